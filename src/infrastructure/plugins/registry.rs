//! Static plugin table - compiled-in plugins addressed as `builtin:<name>`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::application::errors::{PluginError, PluginResult};
use crate::plugins::context::PluginContext;
use crate::plugins::metadata::BUILTIN_SCHEME;
use crate::plugins::trait_def::{ModuleLoader, Plugin, PluginFactory};

/// Registry of plugin factories compiled into the binary
pub struct StaticLoader {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Location under which a compiled-in plugin is addressed
    pub fn location(name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", BUILTIN_SCHEME, name))
    }

    /// Register a factory; returns the location to hand to the plugin manager
    pub fn register<F>(&self, name: &str, factory: F) -> Result<PathBuf, PluginError>
    where
        F: Fn(&mut PluginContext) -> PluginResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;

        if factories.contains_key(name) {
            return Err(PluginError::Load(format!("Plugin '{}' already registered", name)));
        }

        factories.insert(name.to_string(), Arc::new(factory));
        Ok(Self::location(name))
    }

    /// Get all registered names
    pub fn names(&self) -> Vec<String> {
        self.factories.read()
            .ok()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn name_of(location: &Path) -> Option<String> {
        location
            .to_str()
            .and_then(|s| s.strip_prefix(BUILTIN_SCHEME))
            .map(str::to_string)
    }

    fn factory(&self, location: &Path) -> Option<PluginFactory> {
        let name = Self::name_of(location)?;
        self.factories.read().ok()?.get(&name).cloned()
    }
}

impl Default for StaticLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for StaticLoader {
    fn name(&self) -> &str {
        "builtin"
    }

    fn accepts(&self, location: &Path) -> bool {
        self.factory(location).is_some()
    }

    fn instantiate(&self, location: &Path, ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>> {
        let factory = self
            .factory(location)
            .ok_or_else(|| PluginError::Unresolved(location.to_path_buf()))?;
        factory(ctx)
    }
}
