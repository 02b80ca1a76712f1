use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::errors::BotError;
use crate::domain::entities::RawMessage;

/// Options accompanying an outgoing message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Message id to quote, when the platform supports replies
    pub reply_to: Option<String>,
    /// Deliver without a notification sound
    pub silent: bool,
}

impl SendOptions {
    pub fn reply_to(id: impl Into<String>) -> Self {
        Self {
            reply_to: Some(id.into()),
            ..Self::default()
        }
    }
}

/// Outbound half of a messaging network connection, handed to plugin handlers
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send text content to a chat, returning the platform message id
    async fn send(&self, chat_id: &str, content: &str, options: SendOptions) -> Result<String, BotError>;
}

/// Lifecycle and inbound events emitted by a network client
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Pairing code available for display (platforms that pair by QR)
    QrReady(String),
    ConnectionOpen,
    ConnectionClose { reason: String, should_reconnect: bool },
    Message(RawMessage),
}

/// Bot identity as reported by the network
#[derive(Debug, Clone)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}

/// Messaging network client: connection lifecycle plus the outbound primitive
#[async_trait]
pub trait NetworkClient: Connection {
    /// Open the connection and return the event stream.
    ///
    /// Calling `connect` again after a `ConnectionClose` opens a fresh stream.
    async fn connect(&self) -> Result<mpsc::Receiver<ConnectionEvent>, BotError>;

    /// Get bot info
    fn bot_info(&self) -> BotInfo;
}
