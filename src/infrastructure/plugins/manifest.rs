//! Declarative plugins - YAML manifests describing commands and canned replies
//!
//! ```yaml
//! name: greet
//! version: 1.0.0
//! author: someone
//! description: Friendly greetings
//! commands:
//!   - tokens: [hello, hi]
//!     description: Say hello
//!     reply: "Hello {sender}! You said: {args}"
//! replies:
//!   - pattern: "(?i)good morning"
//!     reply: "Morning!"
//! ```
//!
//! Manifests are re-read on every load, so a reload always runs the current file.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::application::errors::{CommandError, PluginError, PluginResult};
use crate::domain::entities::{CommandHandler, Message};
use crate::domain::traits::{Connection, SendOptions};
use crate::plugins::context::PluginContext;
use crate::plugins::trait_def::{ModuleLoader, Plugin, PluginInfo};

/// Plugin manifest as written on disk
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginManifest {
    /// Plugin name (required)
    pub name: String,

    /// Plugin version (required)
    pub version: String,

    #[serde(default)]
    pub author: String,

    pub description: Option<String>,

    /// Self-declared category; the containing directory takes precedence
    pub category: Option<String>,

    #[serde(default)]
    pub commands: Vec<ManifestCommand>,

    /// Pattern-triggered replies offered unmatched messages
    #[serde(default)]
    pub replies: Vec<ManifestReply>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestCommand {
    pub tokens: Vec<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub reply: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestReply {
    pub pattern: String,
    pub reply: String,
}

impl PluginManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::Manifest {
            path: path.to_path_buf(),
            reason: format!("Failed to read manifest: {}", e),
        })?;

        serde_yaml::from_str(&content).map_err(|e| PluginError::Manifest {
            path: path.to_path_buf(),
            reason: format!("Failed to parse manifest: {}", e),
        })
    }
}

fn placeholder(name: &str, message: &Message) -> Option<String> {
    match name {
        "sender" => Some(message.sender_id.clone()),
        "chat" => Some(message.chat_id.clone()),
        "text" => Some(message.text.clone()),
        "command" => Some(message.command.clone().unwrap_or_default()),
        "args" => Some(message.args.join(" ")),
        _ => None,
    }
}

/// Fill `{sender}`, `{chat}`, `{text}`, `{command}` and `{args}` placeholders.
///
/// Single pass over the template: substituted values are never expanded again,
/// and unknown placeholders are left as written.
pub fn render(template: &str, message: &Message) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let filled = tail
            .find('}')
            .and_then(|end| placeholder(&tail[1..end], message).map(|value| (value, end)));
        match filled {
            Some((value, end)) => {
                out.push_str(&value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// A plugin backed by a manifest
pub struct ManifestPlugin {
    info: PluginInfo,
    manifest: PluginManifest,
    patterns: OnceLock<Vec<(Regex, String)>>,
}

impl ManifestPlugin {
    pub fn new(manifest: PluginManifest) -> Self {
        let mut info = PluginInfo::new(&manifest.name, &manifest.version, &manifest.author);
        info.description = manifest.description.clone();
        Self {
            info,
            manifest,
            patterns: OnceLock::new(),
        }
    }

    fn validate(&self) -> PluginResult<Vec<(Regex, String)>> {
        for command in &self.manifest.commands {
            if command.tokens.iter().all(|t| t.trim().is_empty()) {
                return Err(PluginError::Init(format!(
                    "command in '{}' declares no tokens",
                    self.manifest.name
                )));
            }
            if command.reply.trim().is_empty() {
                return Err(PluginError::Init(format!(
                    "command '{}' has an empty reply",
                    command.tokens.join("/")
                )));
            }
        }

        self.manifest
            .replies
            .iter()
            .map(|r| {
                Regex::new(&r.pattern)
                    .map(|re| (re, r.reply.clone()))
                    .map_err(|e| PluginError::Init(format!("invalid pattern '{}': {}", r.pattern, e)))
            })
            .collect()
    }
}

#[async_trait]
impl Plugin for ManifestPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn category(&self) -> Option<&str> {
        self.manifest.category.as_deref()
    }

    async fn init(&self) -> PluginResult<()> {
        let patterns = self.validate()?;
        let _ = self.patterns.set(patterns);
        Ok(())
    }

    fn commands(&self) -> Vec<CommandHandler> {
        self.manifest
            .commands
            .iter()
            .map(|command| {
                let reply = command.reply.clone();
                let mut handler = CommandHandler::new(command.tokens.iter().cloned()).with_handler(
                    move |conn: Arc<dyn Connection>, message: Message, _args: Vec<String>| {
                        let text = render(&reply, &message);
                        async move {
                            conn.send(&message.chat_id, &text, SendOptions::reply_to(message.id.clone()))
                                .await
                                .map(|_| ())
                                .map_err(|e| CommandError::Reply(e.to_string()))
                        }
                    },
                );
                handler.description = command.description.clone();
                handler.usage = command.usage.clone();
                handler
            })
            .collect()
    }

    fn handles_messages(&self) -> bool {
        !self.manifest.replies.is_empty()
    }

    async fn handle_message(&self, conn: Arc<dyn Connection>, message: &Message) -> PluginResult<bool> {
        let Some(patterns) = self.patterns.get() else {
            return Ok(false);
        };

        let Some((_, reply)) = patterns.iter().find(|(re, _)| re.is_match(&message.text)) else {
            return Ok(false);
        };

        conn.send(&message.chat_id, &render(reply, message), SendOptions::default())
            .await
            .map_err(|e| PluginError::Handler(e.to_string()))?;
        Ok(true)
    }
}

/// Loads `*.yaml` / `*.yml` manifests
#[derive(Debug, Default)]
pub struct ManifestLoader;

impl ManifestLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for ManifestLoader {
    fn name(&self) -> &str {
        "manifest"
    }

    fn accepts(&self, location: &Path) -> bool {
        matches!(
            location.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }

    fn instantiate(&self, location: &Path, _ctx: &mut PluginContext) -> PluginResult<Arc<dyn Plugin>> {
        let manifest = PluginManifest::from_file(location)?;
        tracing::debug!("Parsed manifest {} from {}", manifest.name, location.display());
        Ok(Arc::new(ManifestPlugin::new(manifest)))
    }

    // Nothing cached: every instantiate re-reads the file
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> PluginManifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_manifest() {
        let m = manifest(
            r#"
name: greet
version: 1.0.0
commands:
  - tokens: [hello, hi]
    reply: "Hello {sender}"
replies:
  - pattern: "(?i)morning"
    reply: "Morning!"
"#,
        );
        assert_eq!(m.name, "greet");
        assert_eq!(m.author, "");
        assert_eq!(m.commands[0].tokens, vec!["hello", "hi"]);
        assert_eq!(m.replies.len(), 1);
    }

    #[test]
    fn test_render_placeholders() {
        let msg = Message::from_command("chat-1", "echo", vec!["a".into(), "b".into()]).with_sender("alice");
        assert_eq!(render("{sender}@{chat}: {command} {args}", &msg), "alice@chat-1: echo a b");
    }

    #[test]
    fn test_render_does_not_expand_user_text() {
        let msg = Message::from_command("chat-1", "echo", vec!["{sender}".into(), "{args}".into()]).with_sender("alice");
        assert_eq!(render("{args} from {sender}", &msg), "{sender} {args} from alice");
        assert_eq!(render("{text}", &msg), "/echo {sender} {args}");
    }

    #[test]
    fn test_render_keeps_unknown_and_unclosed_braces() {
        let msg = Message::from_text("chat-1", "hi").with_sender("bob");
        assert_eq!(render("{nope} {sender} {", &msg), "{nope} bob {");
        assert_eq!(render("{{sender}}", &msg), "{bob}");
    }

    #[tokio::test]
    async fn test_init_rejects_bad_pattern() {
        let plugin = ManifestPlugin::new(manifest(
            r#"
name: broken
version: 0.1.0
replies:
  - pattern: "(unclosed"
    reply: "x"
"#,
        ));
        assert!(matches!(plugin.init().await, Err(PluginError::Init(_))));
    }

    #[tokio::test]
    async fn test_init_rejects_tokenless_command() {
        let plugin = ManifestPlugin::new(manifest(
            r#"
name: broken
version: 0.1.0
commands:
  - tokens: [""]
    reply: "x"
"#,
        ));
        assert!(plugin.init().await.is_err());
    }

    #[test]
    fn test_loader_accepts_yaml_only() {
        let loader = ManifestLoader::new();
        assert!(loader.accepts(Path::new("/p/fun/a.yaml")));
        assert!(loader.accepts(Path::new("/p/a.yml")));
        assert!(!loader.accepts(Path::new("/p/a.so")));
        assert!(!loader.accepts(Path::new("/p/README.md")));
    }
}
