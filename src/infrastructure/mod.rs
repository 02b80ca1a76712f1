//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Adapters: Platform integrations (Telegram, console)
//! - Plugins: Module loaders
//! - Process / Watcher: Worker processes and filesystem watching for the supervisor

pub mod adapters;
pub mod config;
pub mod plugins;
pub mod process;
pub mod watcher;
