//! Filesystem change source backed by notify

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::errors::SupervisorError;
use crate::application::supervisor::{ChangeSource, WatchGuard};

/// Watches a set of files and directories
#[derive(Debug, Clone, Default)]
pub struct FsChangeSource {
    /// Directories here are watched recursively
    paths: Vec<PathBuf>,
    /// Watched without descending, e.g. the directory holding the binary
    shallow: Vec<PathBuf>,
}

impl FsChangeSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let mut unique: Vec<PathBuf> = Vec::new();
        for path in paths {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        Self {
            paths: unique,
            shallow: Vec::new(),
        }
    }

    pub fn with_shallow(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.shallow.contains(&path) && !self.paths.contains(&path) {
            self.shallow.push(path);
        }
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Only content and presence changes matter
fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

impl ChangeSource for FsChangeSource {
    fn watch(&self, changes: mpsc::UnboundedSender<PathBuf>) -> Result<Vec<WatchGuard>, SupervisorError> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_relevant(&event.kind) => {
                    for path in event.paths {
                        let _ = changes.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("File watch error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| SupervisorError::Watch(format!("Failed to create file watcher: {}", e)))?;

        let targets = self
            .paths
            .iter()
            .map(|p| (p, p.is_dir()))
            .chain(self.shallow.iter().map(|p| (p, false)));

        let mut watched = 0;
        for (path, recursive) in targets {
            if !path.exists() {
                debug!("Not watching missing path {}", path.display());
                continue;
            }
            let mode = if recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(path, mode)
                .map_err(|e| SupervisorError::Watch(format!("Failed to watch {}: {}", path.display(), e)))?;
            debug!("Watching {}", path.display());
            watched += 1;
        }

        if watched == 0 {
            return Err(SupervisorError::Watch("no existing paths to watch".to_string()));
        }

        Ok(vec![Box::new(watcher)])
    }
}
