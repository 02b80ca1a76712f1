//! `ping` - liveness check

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::application::errors::{CommandError, PluginResult};
use crate::domain::entities::{CommandHandler, Message};
use crate::domain::traits::{Connection, SendOptions};
use crate::plugins::context::PluginContext;
use crate::plugins::trait_def::{Plugin, PluginInfo};

pub struct PingPlugin {
    info: PluginInfo,
}

impl PingPlugin {
    pub fn new() -> Self {
        Self {
            info: PluginInfo::new("ping", env!("CARGO_PKG_VERSION"), "sambung-bot")
                .with_description("Check that the bot is alive"),
        }
    }

    pub fn create(_ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>> {
        Ok(Arc::new(Self::new()))
    }
}

impl Default for PingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PingPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn commands(&self) -> Vec<CommandHandler> {
        vec![CommandHandler::new(["ping", "pong"])
            .with_description("Check bot latency")
            .with_handler(|conn: Arc<dyn Connection>, message: Message, _args: Vec<String>| async move {
                let latency = (Utc::now() - message.timestamp).num_milliseconds().max(0);
                let reply = format!("Pong! ({} ms)", latency);
                conn.send(&message.chat_id, &reply, SendOptions::reply_to(message.id.clone()))
                    .await
                    .map(|_| ())
                    .map_err(|e| CommandError::Reply(e.to_string()))
            })]
    }
}
