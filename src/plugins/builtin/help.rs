//! `help` - lists commands grouped by category

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::application::errors::{CommandError, PluginResult};
use crate::domain::entities::{CommandHandler, Message};
use crate::domain::traits::{Connection, SendOptions};
use crate::plugins::context::{ManagerView, PluginContext};
use crate::plugins::trait_def::{Plugin, PluginInfo};

pub struct HelpPlugin {
    info: PluginInfo,
    view: ManagerView,
}

impl HelpPlugin {
    pub fn new(view: ManagerView) -> Self {
        Self {
            info: PluginInfo::new("help", env!("CARGO_PKG_VERSION"), "sambung-bot")
                .with_description("List available commands"),
            view,
        }
    }

    pub fn create(ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>> {
        Ok(Arc::new(Self::new(ctx.manager().clone())))
    }
}

/// Declared tokens that still route to `cmd`; tokens lost to another plugin are skipped
fn owned_tokens<'a>(cmd: &'a Arc<CommandHandler>, commands: &BTreeMap<String, Arc<CommandHandler>>) -> Vec<&'a str> {
    cmd.tokens
        .iter()
        .filter(|t| {
            commands
                .get(&t.to_lowercase())
                .is_some_and(|owner| Arc::ptr_eq(owner, cmd))
        })
        .map(String::as_str)
        .collect()
}

/// Render the command listing, or details for a single token
pub fn render_help(view: &ManagerView, topic: Option<&str>) -> String {
    let prefix = view.prefix();
    let commands = view.commands();

    if let Some(topic) = topic {
        let Some(cmd) = commands.get(&topic.to_lowercase()) else {
            return format!("Command {}{} not found", prefix, topic);
        };
        let tokens = owned_tokens(cmd, &commands);
        let mut help = format!(
            "{}{} - {}",
            prefix,
            tokens.first().copied().unwrap_or(topic),
            cmd.description.as_deref().unwrap_or("No description")
        );
        if tokens.len() > 1 {
            help.push_str(&format!("\nAliases: {}", tokens[1..].join(", ")));
        }
        if let Some(usage) = &cmd.usage {
            help.push_str(&format!("\nUsage: {}", usage));
        }
        return help;
    }

    // One line per handler, not per alias
    let mut by_category: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for cmd in commands.values() {
        let Some(token) = owned_tokens(cmd, &commands).first().map(|t| t.to_string()) else {
            continue;
        };
        let category = cmd.category.clone().unwrap_or_else(|| "general".to_string());
        by_category
            .entry(category)
            .or_default()
            .insert(token, cmd.description.clone().unwrap_or_default());
    }

    if by_category.is_empty() {
        return "No commands available.".to_string();
    }

    let mut help = "Available commands:\n".to_string();
    for (category, entries) in by_category {
        help.push_str(&format!("\n[{}]\n", category));
        for (token, description) in entries {
            help.push_str(&format!("  {}{} - {}\n", prefix, token, description));
        }
    }
    help
}

#[async_trait]
impl Plugin for HelpPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn commands(&self) -> Vec<CommandHandler> {
        let view = self.view.clone();
        vec![CommandHandler::new(["help", "menu"])
            .with_description("Show this message")
            .with_usage("/help [command]")
            .with_handler(move |conn: Arc<dyn Connection>, message: Message, args: Vec<String>| {
                let text = render_help(&view, args.first().map(String::as_str));
                async move {
                    conn.send(&message.chat_id, &text, SendOptions::reply_to(message.id.clone()))
                        .await
                        .map(|_| ())
                        .map_err(|e| CommandError::Reply(e.to_string()))
                }
            })]
    }
}
