//! Plugin system for sambung-bot
//!
//! Discovers plugin modules, manages their lifecycle and routes messages to them.

pub mod builtin;
pub mod context;
pub mod manager;
pub mod metadata;
pub mod trait_def;

pub use context::{ManagerView, PluginContext};
pub use manager::{DispatchOutcome, LoadSummary, PluginManager, FAILURE_NOTICE};
pub use metadata::{LoadedPlugin, MetadataStore, PluginDescriptor};
pub use trait_def::{LoadState, ModuleLoader, Plugin, PluginFactory, PluginInfo, PluginSummary};
