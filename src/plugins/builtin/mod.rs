//! Plugins compiled into the binary

pub mod help;
pub mod ping;

use std::path::PathBuf;

use crate::application::errors::PluginError;
use crate::infrastructure::plugins::StaticLoader;

pub use help::HelpPlugin;
pub use ping::PingPlugin;

/// Category given to compiled-in plugins
pub const BUILTIN_CATEGORY: &str = "general";

/// Register every compiled-in plugin, returning their locations
pub fn register_all(loader: &StaticLoader) -> Result<Vec<PathBuf>, PluginError> {
    Ok(vec![
        loader.register("ping", PingPlugin::create)?,
        loader.register("help", HelpPlugin::create)?,
    ])
}
