//! Console adapter for development/testing

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use crate::domain::entities::RawMessage;
use crate::domain::traits::{BotInfo, Connection, ConnectionEvent, NetworkClient, SendOptions};
use crate::application::errors::BotError;

const CHAT_ID: &str = "console";
const SENDER_ID: &str = "console-user";

type Input = Box<dyn AsyncBufRead + Send + Unpin>;

/// Console bot adapter for local development.
///
/// Each input line is one inbound message; replies are printed to stdout.
/// Not usable under the supervisor, which owns the worker's stdin and stdout.
pub struct ConsoleAdapter {
    info: BotInfo,
    input: Mutex<Option<Input>>,
    sender: Option<mpsc::Sender<String>>,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self::with_input(BufReader::new(tokio::io::stdin()))
    }

    /// Read messages from `input` instead of stdin
    pub fn with_input(input: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            info: BotInfo {
                id: "console".to_string(),
                name: "sambung-bot".to_string(),
                username: "console".to_string(),
            },
            input: Mutex::new(Some(Box::new(input))),
            sender: None,
        }
    }

    /// Also forward every outgoing text to `sender`
    pub fn with_sender(mut self, sender: mpsc::Sender<String>) -> Self {
        self.sender = Some(sender);
        self
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for ConsoleAdapter {
    async fn send(&self, _chat_id: &str, content: &str, _options: SendOptions) -> Result<String, BotError> {
        println!("[BOT] {}", content);
        if let Some(sender) = &self.sender {
            let _ = sender.send(content.to_string()).await;
        }
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl NetworkClient for ConsoleAdapter {
    async fn connect(&self) -> Result<mpsc::Receiver<ConnectionEvent>, BotError> {
        let input = self
            .input
            .lock()
            .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| BotError::Network("Console input already consumed".to_string()))?;

        tracing::info!("Starting console bot (dev mode)");
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if tx.send(ConnectionEvent::ConnectionOpen).await.is_err() {
                return;
            }

            let mut lines = input.lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let raw = RawMessage::new(CHAT_ID, SENDER_ID, line).with_platform("console");
                        if tx.send(ConnectionEvent::Message(raw)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break "console input closed".to_string(),
                    Err(e) => break format!("console read failed: {}", e),
                }
            };

            let _ = tx
                .send(ConnectionEvent::ConnectionClose {
                    reason,
                    should_reconnect: false,
                })
                .await;
        });

        Ok(rx)
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}
