//! Plugin manager - discovery, plugin lifecycle and message dispatch

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{CommandHandler, CommandRegistry, Message};
use crate::domain::traits::{Connection, SendOptions};
use crate::plugins::context::{ManagerView, PluginContext};
use crate::plugins::metadata::{category_for, normalize_location, LoadedPlugin, MetadataStore, PluginDescriptor};
use crate::plugins::trait_def::{LoadState, ModuleLoader, PluginSummary};

/// Reply sent to the sender when a command handler fails
pub const FAILURE_NOTICE: &str = "Sorry, something went wrong while running that command.";

/// Aggregate result of `load_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Descriptors known to the manager
    pub discovered: usize,
    /// Descriptors in the `Loaded` state afterwards
    pub loaded: usize,
    /// Loads that failed during this pass
    pub failed: usize,
    /// Tokens in the command registry afterwards
    pub commands: usize,
}

/// Where a message ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A command handler ran successfully
    Command(String),
    /// A command handler failed; the sender got the failure notice
    CommandFailed(String),
    /// A plugin's message handler claimed the message
    Handled(String),
    Unhandled,
}

pub(crate) struct ManagerState {
    registry: RwLock<CommandRegistry>,
    metadata: RwLock<MetadataStore>,
    loader: Arc<dyn ModuleLoader>,
    root: RwLock<Option<PathBuf>>,
    load_seq: AtomicU64,
    pub(crate) prefix: String,
}

impl ManagerState {
    fn metadata(&self) -> PluginResult<RwLockReadGuard<'_, MetadataStore>> {
        self.metadata
            .read()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn metadata_mut(&self) -> PluginResult<RwLockWriteGuard<'_, MetadataStore>> {
        self.metadata
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn registry(&self) -> PluginResult<RwLockReadGuard<'_, CommandRegistry>> {
        self.registry
            .read()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn registry_mut(&self) -> PluginResult<RwLockWriteGuard<'_, CommandRegistry>> {
        self.registry
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn root(&self) -> Option<PathBuf> {
        self.root.read().ok().and_then(|r| r.clone())
    }

    pub(crate) fn command_snapshot(&self) -> BTreeMap<String, Arc<CommandHandler>> {
        self.registry().map(|r| r.snapshot()).unwrap_or_default()
    }

    pub(crate) fn plugin_summaries(&self) -> Vec<PluginSummary> {
        self.metadata().map(|m| m.summaries()).unwrap_or_default()
    }
}

/// Plugin loader and dispatch engine.
///
/// Cheap to clone; all clones share the same registry and metadata store.
#[derive(Clone)]
pub struct PluginManager {
    state: Arc<ManagerState>,
}

impl PluginManager {
    /// Create a new plugin manager resolving modules through `loader`
    pub fn new(loader: Arc<dyn ModuleLoader>, prefix: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ManagerState {
                registry: RwLock::new(CommandRegistry::new()),
                metadata: RwLock::new(MetadataStore::new()),
                loader,
                root: RwLock::new(None),
                load_seq: AtomicU64::new(0),
                prefix: prefix.into(),
            }),
        }
    }

    /// Read-only view handed to plugins
    pub fn view(&self) -> ManagerView {
        ManagerView::new(Arc::downgrade(&self.state))
    }

    pub fn plugin_root(&self) -> Option<PathBuf> {
        self.state.root()
    }

    /// Walk `root` and create an `Unloaded` descriptor for every module found.
    ///
    /// The first directory level below `root` names the category of everything
    /// beneath it. A missing root is created and yields no descriptors. No plugin
    /// code runs here.
    pub fn discover(&self, root: impl AsRef<Path>) -> PluginResult<usize> {
        let root = normalize_location(root.as_ref());
        if let Ok(mut current) = self.state.root.write() {
            *current = Some(root.clone());
        }

        if !root.exists() {
            std::fs::create_dir_all(&root)
                .map_err(|e| PluginError::Load(format!("Failed to create plugin directory {}: {}", root.display(), e)))?;
            info!("Created plugin directory {}", root.display());
            return Ok(0);
        }

        let mut found = Vec::new();
        self.walk(&root, &root, &mut found);

        let mut metadata = self.state.metadata_mut()?;
        let mut added = 0;
        for (location, category) in found {
            debug!(location = %location.display(), category = ?category, "Discovered plugin module");
            if metadata.insert(PluginDescriptor::new(&location, category)) {
                added += 1;
            }
        }

        info!("Discovered {} plugin(s) under {} ({} known)", added, root.display(), metadata.len());
        Ok(added)
    }

    fn walk(&self, root: &Path, dir: &Path, found: &mut Vec<(PathBuf, Option<String>)>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read plugin directory {}: {}", dir.display(), e);
                return;
            }
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => warn!("Failed to read directory entry in {}: {}", dir.display(), e),
            }
        }
        paths.sort();

        for path in paths {
            // Skip hidden entries
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
            {
                continue;
            }

            if path.is_dir() {
                self.walk(root, &path, found);
            } else if self.state.loader.accepts(&path) {
                let category = category_for(root, &path);
                found.push((path, category));
            }
        }
    }

    /// Add a descriptor for a location that is not found by discovery, such as a
    /// compiled-in plugin. Returns false if the location is already known.
    pub fn register_location(&self, location: impl AsRef<Path>, category: Option<String>) -> bool {
        match self.state.metadata_mut() {
            Ok(mut metadata) => metadata.insert(PluginDescriptor::new(location, category)),
            Err(e) => {
                error!("Failed to register plugin location: {}", e);
                false
            }
        }
    }

    /// Load every `Unloaded` descriptor concurrently.
    ///
    /// A failing plugin is logged and stays `Unloaded`; the others are unaffected.
    pub async fn load_all(&self) -> LoadSummary {
        let pending = match self.state.metadata() {
            Ok(metadata) => metadata.unloaded(),
            Err(e) => {
                error!("Failed to read plugin metadata: {}", e);
                Vec::new()
            }
        };

        let mut tasks = JoinSet::new();
        for location in pending {
            let manager = self.clone();
            tasks.spawn(async move {
                let result = manager.load(&location).await;
                (location, result)
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((location, Err(e))) => {
                    failed += 1;
                    error!("Failed to load plugin {}: {}", location.display(), e);
                }
                Err(e) => {
                    failed += 1;
                    error!("Plugin load task aborted: {}", e);
                }
            }
        }

        let (discovered, loaded) = self
            .state
            .metadata()
            .map(|m| (m.len(), m.loaded_count()))
            .unwrap_or_default();
        let summary = LoadSummary {
            discovered,
            loaded,
            failed,
            commands: self.command_count(),
        };

        info!(
            "Loaded {}/{} plugin(s), {} failed, {} command(s) registered",
            summary.loaded, summary.discovered, summary.failed, summary.commands
        );
        summary
    }

    /// Load one descriptor. Returns `Ok(false)` if it was already loaded.
    pub async fn load(&self, location: impl AsRef<Path>) -> PluginResult<bool> {
        let location = normalize_location(location.as_ref());

        let category = {
            let metadata = self.state.metadata()?;
            let descriptor = metadata
                .get(&location)
                .ok_or_else(|| PluginError::NotFound(location.display().to_string()))?;
            if descriptor.state() == LoadState::Loaded {
                debug!("Plugin {} already loaded", location.display());
                return Ok(false);
            }
            descriptor.category.clone()
        };

        let mut ctx = PluginContext::new(&location, category.clone(), self.view());
        let plugin = self.state.loader.instantiate(&location, &mut ctx)?;

        if let Some(own) = plugin.category() {
            if category.as_deref() != Some(own) {
                debug!(
                    plugin = %plugin.info().name,
                    "Ignoring self-declared category '{}' in favour of {:?}",
                    own,
                    category
                );
            }
        }

        plugin
            .init()
            .await
            .map_err(|e| PluginError::Init(format!("{}: {}", plugin.info().name, e)))?;

        let mut handlers = plugin.commands();
        handlers.extend(ctx.into_registered());
        let commands: Vec<Arc<CommandHandler>> = handlers
            .into_iter()
            .map(|h| Arc::new(h.with_category(category.clone())))
            .collect();

        let mut metadata = self.state.metadata_mut()?;
        let descriptor = metadata
            .get_mut(&location)
            .ok_or_else(|| PluginError::NotFound(location.display().to_string()))?;

        // Lost a race with a concurrent load of the same descriptor
        if descriptor.state() == LoadState::Loaded {
            plugin.shutdown();
            return Ok(false);
        }

        let mut registry = self.state.registry_mut()?;
        let mut registered = 0;
        for handler in &commands {
            registered += registry.register(handler.clone()).registered.len();
        }

        let info = plugin.info().clone();
        descriptor.set_instance(LoadedPlugin {
            plugin,
            category: category.clone(),
            commands,
            load_seq: self.state.load_seq.fetch_add(1, Ordering::SeqCst),
        });

        info!(
            category = category.as_deref().unwrap_or("-"),
            "Loaded plugin: {} v{} ({} command token(s))",
            info.name,
            info.version,
            registered
        );
        Ok(true)
    }

    /// Unload a plugin, keeping its descriptor for a later reload.
    ///
    /// Returns false if the location is unknown or not loaded.
    pub fn unload(&self, location: impl AsRef<Path>) -> bool {
        let location = normalize_location(location.as_ref());

        let instance = {
            let mut metadata = match self.state.metadata_mut() {
                Ok(m) => m,
                Err(e) => {
                    error!("Failed to unload {}: {}", location.display(), e);
                    return false;
                }
            };
            let Some(instance) = metadata.get_mut(&location).and_then(|d| d.take_instance()) else {
                debug!("Unload skipped: {} is unknown or not loaded", location.display());
                return false;
            };

            match self.state.registry_mut() {
                Ok(mut registry) => {
                    for handler in &instance.commands {
                        registry.unregister_all(handler);
                    }
                }
                Err(e) => error!("Failed to unregister commands of {}: {}", location.display(), e),
            }
            instance
        };

        instance.plugin.shutdown();
        info!("Unloaded plugin: {}", instance.plugin.info().name);
        true
    }

    /// Unload then load, picking up the module's current contents.
    ///
    /// An unknown location is treated as a new plugin. Never fails; problems,
    /// panics included, are logged and reported as `false`.
    pub async fn reload(&self, location: impl AsRef<Path>) -> bool {
        let location = normalize_location(location.as_ref());

        let known = self
            .state
            .metadata()
            .map(|m| m.contains(&location))
            .unwrap_or(false);

        if known {
            self.unload(&location);
        } else {
            if !self.state.loader.accepts(&location) {
                warn!("Reload ignored: {} is not a plugin module", location.display());
                return false;
            }
            let category = self
                .state
                .root()
                .and_then(|root| category_for(&root, &location));
            info!("New plugin detected: {} (category {:?})", location.display(), category);
            self.register_location(&location, category);
        }

        self.state.loader.invalidate(&location);

        // Factory and init run on their own task so a panicking plugin stays contained
        let task = {
            let manager = self.clone();
            let location = location.clone();
            tokio::spawn(async move { manager.load(&location).await })
        };

        match task.await {
            Ok(Ok(_)) => {
                info!("Reloaded plugin {}", location.display());
                true
            }
            Ok(Err(e)) => {
                error!("Failed to reload plugin {}: {}", location.display(), e);
                false
            }
            Err(e) => {
                error!("Plugin {} panicked while reloading: {}", location.display(), e);
                false
            }
        }
    }

    /// Route one message: a registered command first, otherwise each loaded
    /// plugin's message handler in load order until one claims it.
    pub async fn dispatch(&self, conn: Arc<dyn Connection>, message: Message) -> DispatchOutcome {
        if let Some(token) = message.command.clone() {
            if let Some(handler) = self.lookup(&token) {
                return self.run_command(conn, message, token.to_lowercase(), handler).await;
            }
            debug!(command = %token, "No command registered, offering to message handlers");
        }

        let plugins = self
            .state
            .metadata()
            .map(|m| m.loaded_in_order())
            .unwrap_or_default();

        for loaded in plugins.into_iter().filter(|p| p.plugin.handles_messages()) {
            let name = loaded.plugin.info().name.clone();
            let task = {
                let plugin = loaded.plugin.clone();
                let conn = conn.clone();
                let message = message.clone();
                tokio::spawn(async move { plugin.handle_message(conn, &message).await })
            };

            match task.await {
                Ok(Ok(true)) => {
                    debug!(plugin = %name, chat = %message.chat_id, "Message handled");
                    return DispatchOutcome::Handled(name);
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => error!(plugin = %name, chat = %message.chat_id, "Message handler failed: {}", e),
                Err(e) => error!(plugin = %name, chat = %message.chat_id, "Message handler panicked: {}", e),
            }
        }

        DispatchOutcome::Unhandled
    }

    async fn run_command(
        &self,
        conn: Arc<dyn Connection>,
        message: Message,
        token: String,
        handler: Arc<CommandHandler>,
    ) -> DispatchOutcome {
        let task = {
            let conn = conn.clone();
            let args = message.args.clone();
            let message = message.clone();
            tokio::spawn(async move { handler.invoke(conn, message, args).await })
        };

        let failure = match task.await {
            Ok(Ok(())) => {
                debug!(command = %token, chat = %message.chat_id, "Command handled");
                return DispatchOutcome::Command(token);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("handler panicked: {}", e),
        };

        error!(
            command = %token,
            chat = %message.chat_id,
            sender = %message.sender_id,
            "Command failed: {}",
            failure
        );

        if let Err(e) = conn
            .send(&message.chat_id, FAILURE_NOTICE, SendOptions::reply_to(message.id.clone()))
            .await
        {
            warn!("Failed to deliver failure notice to {}: {}", message.chat_id, e);
        }

        DispatchOutcome::CommandFailed(token)
    }

    pub fn lookup(&self, token: &str) -> Option<Arc<CommandHandler>> {
        self.state.registry().ok().and_then(|r| r.lookup(token))
    }

    /// Snapshot of registered commands
    pub fn commands(&self) -> BTreeMap<String, Arc<CommandHandler>> {
        self.state.command_snapshot()
    }

    pub fn command_count(&self) -> usize {
        self.state.registry().map(|r| r.len()).unwrap_or(0)
    }

    /// Every known plugin, loaded or not
    pub fn plugins(&self) -> Vec<PluginSummary> {
        self.state.plugin_summaries()
    }

    pub fn state_of(&self, location: impl AsRef<Path>) -> Option<LoadState> {
        self.state
            .metadata()
            .ok()
            .and_then(|m| m.get(&normalize_location(location.as_ref())).map(|d| d.state()))
    }

    pub fn prefix(&self) -> &str {
        &self.state.prefix
    }
}
