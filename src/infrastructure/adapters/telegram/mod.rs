//! Telegram adapter - long polling over the Bot API

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::domain::entities::RawMessage;
use crate::domain::traits::{BotInfo, Connection, ConnectionEvent, NetworkClient, SendOptions};
use crate::application::errors::BotError;

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Server-side long poll timeout, in seconds
const POLL_TIMEOUT: i64 = 30;

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Telegram bot adapter. Clones share the HTTP client and bot info.
#[derive(Clone)]
pub struct TelegramAdapter {
    token: String,
    api_base: String,
    client: Client,
    info: Arc<RwLock<BotInfo>>,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: API_BASE.to_string(),
            client: Client::new(),
            info: Arc::new(RwLock::new(BotInfo {
                id: "unknown".to_string(),
                name: "sambung-bot".to_string(),
                username: "sambung_bot".to_string(),
            })),
        }
    }

    /// Point the adapter at another Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, BotError>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let response = self.client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(BotError::Auth(format!("Telegram rejected the bot token ({})", status)));
        }

        let data: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| BotError::Parse(e.to_string()))?;

        if !data.ok {
            return Err(BotError::Network(format!(
                "Telegram API error: {}",
                data.description.unwrap_or_else(|| status.to_string())
            )));
        }

        data.result
            .ok_or_else(|| BotError::Parse(format!("{} returned no result", method)))
    }

    /// Fetch bot info from Telegram API
    pub async fn fetch_bot_info(&self) -> Result<BotInfo, BotError> {
        #[derive(Deserialize)]
        struct Me {
            id: i64,
            first_name: String,
            username: Option<String>,
        }

        let me: Me = self.call("getMe", &serde_json::json!({})).await?;
        let info = BotInfo {
            id: me.id.to_string(),
            name: me.first_name,
            username: me.username.unwrap_or_default(),
        };

        if let Ok(mut current) = self.info.write() {
            *current = info.clone();
        }
        Ok(info)
    }

    /// Get updates from Telegram using getUpdates API
    pub async fn get_updates(&self, offset: i64, timeout: i64) -> Result<Vec<Update>, BotError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: i64,
            allowed_updates: Vec<String>,
        }

        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: vec!["message".to_string()],
        };
        self.call("getUpdates", &request).await
    }

    /// Get the next update offset
    pub fn get_next_offset(updates: &[Update]) -> Option<i64> {
        updates.iter()
            .map(|u| u.update_id + 1)
            .max()
    }

    /// Convert an update into the adapter-neutral payload
    pub fn to_raw(update: &Update) -> Option<RawMessage> {
        let message = update.message.as_ref()?;
        let text = message.text.clone().or_else(|| message.caption.clone());
        let sender = message
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| message.chat.id.to_string());

        Some(RawMessage {
            id: message.message_id.to_string(),
            chat_id: message.chat.id.to_string(),
            sender_id: sender,
            is_group: matches!(message.chat.kind.as_str(), "group" | "supergroup"),
            text,
            platform: "telegram".to_string(),
        })
    }

    async fn poll(self, tx: mpsc::Sender<ConnectionEvent>) {
        let mut offset = 0;
        let close = loop {
            match self.get_updates(offset, POLL_TIMEOUT).await {
                Ok(updates) => {
                    if let Some(next) = Self::get_next_offset(&updates) {
                        offset = next;
                    }
                    for raw in updates.iter().filter_map(Self::to_raw) {
                        if tx.send(ConnectionEvent::Message(raw)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(BotError::Auth(reason)) => {
                    break ConnectionEvent::ConnectionClose { reason, should_reconnect: false };
                }
                Err(e) => {
                    break ConnectionEvent::ConnectionClose {
                        reason: e.to_string(),
                        should_reconnect: true,
                    };
                }
            }
        };

        let _ = tx.send(close).await;
    }
}

#[async_trait]
impl Connection for TelegramAdapter {
    async fn send(&self, chat_id: &str, content: &str, options: SendOptions) -> Result<String, BotError> {
        #[derive(Serialize)]
        struct SendMessageRequest<'a> {
            chat_id: &'a str,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            reply_to_message_id: Option<i64>,
            disable_notification: bool,
        }

        #[derive(Deserialize)]
        struct MessageResult {
            message_id: i64,
        }

        tracing::debug!("Sending to {}: {}", chat_id, content);
        let request = SendMessageRequest {
            chat_id,
            text: content,
            reply_to_message_id: options.reply_to.as_deref().and_then(|id| id.parse().ok()),
            disable_notification: options.silent,
        };

        let result: MessageResult = self.call("sendMessage", &request).await?;
        Ok(result.message_id.to_string())
    }
}

#[async_trait]
impl NetworkClient for TelegramAdapter {
    async fn connect(&self) -> Result<mpsc::Receiver<ConnectionEvent>, BotError> {
        let info = self.fetch_bot_info().await?;
        tracing::info!("Connected to Telegram as @{} ({})", info.username, info.id);

        let (tx, rx) = mpsc::channel(64);
        tx.send(ConnectionEvent::ConnectionOpen)
            .await
            .map_err(|_| BotError::Internal("event channel closed".to_string()))?;
        tokio::spawn(self.clone().poll(tx));
        Ok(rx)
    }

    fn bot_info(&self) -> BotInfo {
        self.info
            .read()
            .map(|info| info.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_private_text_message() {
        let u = update(
            r#"{"update_id":10,"message":{"message_id":5,"from":{"id":42,"username":"alice"},
                "chat":{"id":42,"type":"private"},"text":"/ping"}}"#,
        );
        let raw = TelegramAdapter::to_raw(&u).unwrap();
        assert_eq!(raw.id, "5");
        assert_eq!(raw.chat_id, "42");
        assert_eq!(raw.sender_id, "42");
        assert!(!raw.is_group);
        assert_eq!(raw.text.as_deref(), Some("/ping"));
        assert_eq!(raw.platform, "telegram");
    }

    #[test]
    fn test_group_caption_message() {
        let u = update(
            r#"{"update_id":11,"message":{"message_id":6,"from":{"id":7},
                "chat":{"id":-100,"type":"supergroup"},"caption":"nice pic"}}"#,
        );
        let raw = TelegramAdapter::to_raw(&u).unwrap();
        assert!(raw.is_group);
        assert_eq!(raw.sender_id, "7");
        assert_eq!(raw.text.as_deref(), Some("nice pic"));
    }

    #[test]
    fn test_next_offset() {
        let updates = vec![update(r#"{"update_id":3}"#), update(r#"{"update_id":9}"#)];
        assert_eq!(TelegramAdapter::get_next_offset(&updates), Some(10));
        assert_eq!(TelegramAdapter::get_next_offset(&[]), None);
        assert!(TelegramAdapter::to_raw(&updates[0]).is_none());
    }

    #[test]
    fn test_api_url() {
        let adapter = TelegramAdapter::new("123:abc").with_api_base("http://localhost:8081/");
        assert_eq!(adapter.api_url("getMe"), "http://localhost:8081/bot123:abc/getMe");
    }
}
