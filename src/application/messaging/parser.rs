//! Message parser - Normalizes raw network payloads into messages

use crate::domain::entities::{Message, RawMessage};

/// Parses incoming payloads into structured Message objects
#[derive(Debug, Clone)]
pub struct MessageParser {
    /// Sorted longest first so "!!" wins over "!"
    prefixes: Vec<String>,
    primary: String,
}

impl MessageParser {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        let primary = prefixes.first().cloned().unwrap_or_else(|| "/".to_string());
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { prefixes, primary }
    }

    /// First configured prefix, used when rendering help text
    pub fn primary_prefix(&self) -> &str {
        &self.primary
    }

    /// Parse a raw payload. Payloads without a text body yield `None`.
    pub fn parse(&self, raw: RawMessage) -> Option<Message> {
        let text = raw.text?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut message = Message::new(raw.chat_id, raw.sender_id)
            .with_group(raw.is_group)
            .with_platform(raw.platform);
        message.id = raw.id;

        if let Some((command, args)) = self.parse_command(trimmed) {
            message.command = Some(command);
            message.args = args;
        }
        message.text = text;
        Some(message)
    }

    /// Split `<prefix><token> args...`
    fn parse_command(&self, text: &str) -> Option<(String, Vec<String>)> {
        let body = self
            .prefixes
            .iter()
            .find_map(|prefix| text.strip_prefix(prefix.as_str()))?;
        if body.starts_with(char::is_whitespace) {
            return None;
        }

        let mut parts = body.split_whitespace();
        let token = parts.next()?;
        // Telegram addresses commands in groups as /cmd@botname
        let token = token.split('@').next().unwrap_or(token);
        if token.is_empty() {
            return None;
        }

        Some((token.to_string(), parts.map(str::to_string).collect()))
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(["/"])
    }
}
