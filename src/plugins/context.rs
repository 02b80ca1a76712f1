//! Context handed to plugin factories

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::domain::entities::CommandHandler;
use crate::plugins::manager::ManagerState;
use crate::plugins::trait_def::PluginSummary;

/// Read-only handle back to the plugin manager.
///
/// Holds a weak reference so plugins never keep the manager alive.
#[derive(Clone)]
pub struct ManagerView {
    state: Weak<ManagerState>,
}

impl ManagerView {
    pub(crate) fn new(state: Weak<ManagerState>) -> Self {
        Self { state }
    }

    /// Snapshot of registered commands, keyed by token
    pub fn commands(&self) -> BTreeMap<String, Arc<CommandHandler>> {
        self.state
            .upgrade()
            .map(|s| s.command_snapshot())
            .unwrap_or_default()
    }

    /// Every known plugin, loaded or not
    pub fn plugins(&self) -> Vec<PluginSummary> {
        self.state
            .upgrade()
            .map(|s| s.plugin_summaries())
            .unwrap_or_default()
    }

    /// Command prefix used when rendering help text
    pub fn prefix(&self) -> String {
        self.state
            .upgrade()
            .map(|s| s.prefix.clone())
            .unwrap_or_else(|| "/".to_string())
    }
}

/// Passed to a module factory while the plugin is being instantiated
pub struct PluginContext {
    location: PathBuf,
    category: Option<String>,
    registered: Vec<CommandHandler>,
    view: ManagerView,
}

impl PluginContext {
    pub(crate) fn new(location: impl Into<PathBuf>, category: Option<String>, view: ManagerView) -> Self {
        Self {
            location: location.into(),
            category,
            registered: Vec::new(),
            view,
        }
    }

    /// Register a command imperatively; it is owned by the plugin being loaded
    /// and removed with it on unload.
    pub fn register_command(&mut self, handler: CommandHandler) {
        self.registered.push(handler);
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn manager(&self) -> &ManagerView {
        &self.view
    }

    pub(crate) fn into_registered(self) -> Vec<CommandHandler> {
        self.registered
    }
}
