//! Decides what a changed file means for the running worker

use regex_lite::Regex;
use std::path::{Path, PathBuf};

use crate::application::errors::ConfigError;
use crate::plugins::metadata::normalize_location;

/// Action taken for a changed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Kill and respawn the worker
    Respawn,
    /// Ask the worker to reload one plugin
    ReloadPlugin(PathBuf),
    /// Informational notice, no restart
    FileChanged(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ChangeClassifier {
    entry: Option<PathBuf>,
    plugin_root: PathBuf,
    config_patterns: Vec<Regex>,
    ignore_patterns: Vec<Regex>,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| ConfigError::InvalidValue(format!("pattern '{}': {}", p, e))))
        .collect()
}

/// Forward slashes so patterns behave the same on every platform
fn path_text(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl ChangeClassifier {
    pub fn new(
        entry: Option<&Path>,
        plugin_root: &Path,
        config_patterns: &[String],
        ignore_patterns: &[String],
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            entry: entry.map(normalize_location),
            plugin_root: normalize_location(plugin_root),
            config_patterns: compile(config_patterns)?,
            ignore_patterns: compile(ignore_patterns)?,
        })
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    pub fn entry(&self) -> Option<&Path> {
        self.entry.as_deref()
    }

    /// Ignored paths never reach the debouncer. The entry file is never ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.entry.as_deref() == Some(normalize_location(path).as_path()) {
            return false;
        }
        let text = path_text(path);
        self.ignore_patterns.iter().any(|re| re.is_match(&text))
    }

    /// Entry file first, then the plugin root, then config patterns
    pub fn classify(&self, path: &Path) -> ChangeKind {
        let path = normalize_location(path);

        if self.entry.as_deref() == Some(path.as_path()) {
            return ChangeKind::Respawn;
        }

        if path.starts_with(&self.plugin_root) && path != self.plugin_root {
            return ChangeKind::ReloadPlugin(path);
        }

        let text = path_text(&path);
        if self.config_patterns.iter().any(|re| re.is_match(&text)) {
            return ChangeKind::Respawn;
        }

        ChangeKind::FileChanged(path)
    }
}
