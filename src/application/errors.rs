//! Application layer errors

use std::path::PathBuf;
use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Reply failed: {0}")]
    Reply(String),
}

/// Plugin lifecycle errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("No loader accepts module: {}", .0.display())]
    Unresolved(PathBuf),

    #[error("Failed to load plugin: {0}")]
    Load(String),

    #[error("Plugin init failed: {0}")]
    Init(String),

    #[error("Invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Process supervision errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Failed to stop worker: {0}")]
    Kill(String),

    #[error("Worker channel is not connected")]
    Disconnected,

    #[error("Watcher error: {0}")]
    Watch(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type PluginResult<T> = Result<T, PluginError>;
