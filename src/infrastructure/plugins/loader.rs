//! Plugin loaders - resolve module locations to plugin instances

use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{CommandHandler, HandlerFn, HandlerFuture, Message};
use crate::domain::traits::Connection;
use crate::plugins::context::PluginContext;
use crate::plugins::trait_def::{ModuleLoader, Plugin, PluginInfo};

/// Symbol every native plugin must export, see [`declare_plugin!`](crate::declare_plugin)
pub const CREATE_SYMBOL: &[u8] = b"sambung_plugin_create";

/// Function signature for native plugin creation.
///
/// Uses the Rust ABI: plugins must be built with the same compiler as the host.
pub type PluginCreateFn = fn(&mut PluginContext) -> PluginResult<Arc<dyn Plugin>>;

/// Export a plugin factory from a `cdylib` plugin crate
#[macro_export]
macro_rules! declare_plugin {
    ($factory:path) => {
        #[no_mangle]
        pub fn sambung_plugin_create(
            ctx: &mut $crate::plugins::PluginContext,
        ) -> $crate::application::errors::PluginResult<std::sync::Arc<dyn $crate::plugins::Plugin>> {
            $factory(ctx)
        }
    };
}

/// Tries each loader in order; the first that accepts a location handles it
pub struct LoaderChain {
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self { loaders: Vec::new() }
    }

    pub fn with(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    fn resolve(&self, location: &Path) -> Option<&Arc<dyn ModuleLoader>> {
        self.loaders.iter().find(|l| l.accepts(location))
    }
}

impl Default for LoaderChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for LoaderChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn accepts(&self, location: &Path) -> bool {
        self.resolve(location).is_some()
    }

    fn instantiate(&self, location: &Path, ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>> {
        let loader = self
            .resolve(location)
            .ok_or_else(|| PluginError::Unresolved(location.to_path_buf()))?;
        tracing::debug!("Instantiating {} with the {} loader", location.display(), loader.name());
        loader.instantiate(location, ctx)
    }

    fn invalidate(&self, location: &Path) {
        for loader in self.loaders.iter().filter(|l| l.accepts(location)) {
            loader.invalidate(location);
        }
    }
}

/// Loads plugins from shared libraries (`.so`, `.dylib`, `.dll`).
///
/// Each library is copied to a private shadow path before opening so a rebuilt
/// file on disk is always opened fresh, never served from the dynamic linker's
/// cache of the old image.
pub struct NativeLoader {
    shadow_dir: PathBuf,
    libraries: Mutex<HashMap<PathBuf, Arc<Library>>>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::with_shadow_dir(std::env::temp_dir().join("sambung-plugins"))
    }

    pub fn with_shadow_dir(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
            libraries: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, location: &Path) -> PluginResult<Arc<Library>> {
        let mut libraries = self.libraries.lock()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;

        if let Some(library) = libraries.get(location) {
            return Ok(library.clone());
        }

        if !location.exists() {
            return Err(PluginError::Load(format!("Library not found: {}", location.display())));
        }

        std::fs::create_dir_all(&self.shadow_dir)
            .map_err(|e| PluginError::Load(format!("Failed to create shadow directory: {}", e)))?;
        let file_name = location
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("plugin");
        let shadow = self
            .shadow_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4(), file_name));
        std::fs::copy(location, &shadow)
            .map_err(|e| PluginError::Load(format!("Failed to stage {}: {}", location.display(), e)))?;

        // Load the library
        let library = unsafe {
            Library::new(&shadow)
                .map_err(|e| PluginError::Load(format!("Failed to load library: {}", e)))
        };

        // The mapping stays valid after the shadow file is unlinked
        if let Err(e) = std::fs::remove_file(&shadow) {
            tracing::debug!("Could not remove shadow copy {}: {}", shadow.display(), e);
        }

        let library = Arc::new(library?);
        libraries.insert(location.to_path_buf(), library.clone());
        Ok(library)
    }
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for NativeLoader {
    fn name(&self) -> &str {
        "native"
    }

    fn accepts(&self, location: &Path) -> bool {
        matches!(
            location.extension().and_then(|e| e.to_str()),
            Some("so") | Some("dylib") | Some("dll")
        )
    }

    fn instantiate(&self, location: &Path, ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>> {
        let library = self.open(location)?;

        // Get the create function
        let create: PluginCreateFn = unsafe {
            let symbol: Symbol<PluginCreateFn> = library
                .get(CREATE_SYMBOL)
                .map_err(|e| PluginError::Load(format!("Failed to find create function: {}", e)))?;
            *symbol
        };

        let inner = create(ctx)?;
        tracing::info!(
            "Opened native plugin {} v{} from {}",
            inner.info().name,
            inner.info().version,
            location.display()
        );

        Ok(Arc::new(NativePlugin { inner, library }))
    }

    fn invalidate(&self, location: &Path) {
        if let Ok(mut libraries) = self.libraries.lock() {
            if libraries.remove(location).is_some() {
                tracing::debug!("Dropped cached library for {}", location.display());
            }
        }
    }
}

/// Keeps the library mapped for as long as the plugin or any of its handlers live
struct NativePlugin {
    // Declared first so it drops before the library
    inner: Arc<dyn Plugin>,
    library: Arc<Library>,
}

struct GuardedHandler {
    handler: HandlerFn,
    _library: Arc<Library>,
}

#[async_trait]
impl Plugin for NativePlugin {
    fn info(&self) -> &PluginInfo {
        self.inner.info()
    }

    fn category(&self) -> Option<&str> {
        self.inner.category()
    }

    async fn init(&self) -> PluginResult<()> {
        self.inner.init().await
    }

    fn commands(&self) -> Vec<CommandHandler> {
        self.inner
            .commands()
            .into_iter()
            .map(|command| {
                let Some(handler) = command.handler_fn() else {
                    return command;
                };
                let guarded = Arc::new(GuardedHandler {
                    handler,
                    _library: self.library.clone(),
                });
                command.with_handler_fn(Arc::new(move |conn: Arc<dyn Connection>, message: Message, args: Vec<String>| -> HandlerFuture {
                    let guarded = guarded.clone();
                    Box::pin(async move {
                        let future = (guarded.handler)(conn, message, args);
                        future.await
                    })
                }))
            })
            .collect()
    }

    fn handles_messages(&self) -> bool {
        self.inner.handles_messages()
    }

    async fn handle_message(&self, conn: Arc<dyn Connection>, message: &Message) -> PluginResult<bool> {
        self.inner.handle_message(conn, message).await
    }

    fn shutdown(&self) {
        self.inner.shutdown()
    }
}
