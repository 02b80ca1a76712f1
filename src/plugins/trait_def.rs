//! Plugin trait definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::errors::PluginResult;
use crate::domain::entities::{CommandHandler, Message};
use crate::domain::traits::Connection;
use crate::plugins::context::PluginContext;

/// Plugin metadata declared by the plugin itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: author.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Core plugin trait that all plugins must implement.
///
/// Only `info` is required; the remaining methods are optional capabilities.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> &PluginInfo;

    /// Self-declared category. Ignored at load time in favour of the directory
    /// the plugin was discovered in.
    fn category(&self) -> Option<&str> {
        None
    }

    /// Runs before any command is registered; an error aborts the load
    async fn init(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Declared command handlers
    fn commands(&self) -> Vec<CommandHandler> {
        Vec::new()
    }

    /// Whether `handle_message` should be offered unmatched messages
    fn handles_messages(&self) -> bool {
        false
    }

    /// Generic message hook. `Ok(true)` claims the message and stops fallback routing.
    async fn handle_message(&self, _conn: Arc<dyn Connection>, _message: &Message) -> PluginResult<bool> {
        Ok(false)
    }

    /// Called when the plugin is unloaded
    fn shutdown(&self) {}
}

/// Factory signature shared by compiled-in plugins and test fixtures
pub type PluginFactory = Arc<dyn Fn(&mut PluginContext) -> PluginResult<Arc<dyn Plugin>> + Send + Sync>;

/// Resolves a plugin location to a live instance.
///
/// Implementations own whatever code cache they keep; `invalidate` must make the
/// next `instantiate` observe the current contents of `location`.
pub trait ModuleLoader: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether `location` is a module this loader understands
    fn accepts(&self, location: &Path) -> bool;

    /// Invoke the module factory
    fn instantiate(&self, location: &Path, ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>>;

    /// Drop any cached code for `location`
    fn invalidate(&self, _location: &Path) {}
}

/// Load state of a plugin descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loaded,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Loaded => write!(f, "loaded"),
        }
    }
}

/// Plugin information for listing
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub location: PathBuf,
    pub category: Option<String>,
    pub state: LoadState,
    pub info: Option<PluginInfo>,
    pub commands: Vec<String>,
}
