//! Module loaders for the plugin system
//! 
//! Plugins come from three places: compiled into the binary (`builtin:<name>`),
//! YAML manifests, and shared libraries exporting `sambung_plugin_create`.

pub mod loader;
pub mod manifest;
pub mod registry;

pub use loader::{LoaderChain, NativeLoader, PluginCreateFn, CREATE_SYMBOL};
pub use manifest::{ManifestLoader, ManifestPlugin, PluginManifest};
pub use registry::StaticLoader;
