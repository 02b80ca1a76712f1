//! Supervisor <-> worker channel: one JSON value per line
//!
//! The worker writes [`WorkerMessage`]s to its stdout and reads
//! [`SupervisorMessage`]s from its stdin. EOF on stdin asks the worker to stop.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::errors::BotError;

/// Set in the worker's environment when it is spawned by the supervisor
pub const SUPERVISED_ENV: &str = "SAMBUNG_SUPERVISED";

/// Lifecycle signals sent by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Plugins are loaded and the network client is connected
    Ready,
    /// The worker hit an unrecoverable error and asks to be replaced
    Restart,
}

/// Instructions sent by the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SupervisorMessage {
    ReloadPlugin { path: PathBuf },
    FileChanged { path: PathBuf },
}

/// Encode a message as a single newline-terminated line
pub fn encode<T: Serialize>(message: &T) -> Result<String, BotError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| BotError::Ipc(format!("Failed to encode message: {}", e)))?;
    line.push('\n');
    Ok(line)
}

pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, BotError> {
    serde_json::from_str(line.trim())
        .map_err(|e| BotError::Ipc(format!("Invalid message {:?}: {}", line.trim(), e)))
}

/// Whether this process was spawned by the supervisor
pub fn is_supervised() -> bool {
    std::env::var(SUPERVISED_ENV).is_ok_and(|v| v == "1")
}
