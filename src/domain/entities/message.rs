use chrono::{DateTime, Utc};

/// Raw inbound payload as delivered by a network adapter, before normalization
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub is_group: bool,
    pub text: Option<String>,
    pub platform: String,
}

impl RawMessage {
    pub fn new(chat_id: impl Into<String>, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            is_group: false,
            text: Some(text.into()),
            platform: "unknown".to_string(),
        }
    }

    pub fn in_group(mut self, is_group: bool) -> Self {
        self.is_group = is_group;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

/// Normalized inbound message consumed by the dispatch engine
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub chat_id: String,
    pub is_group: bool,
    pub text: String,
    /// Command token without prefix, as typed by the sender
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub platform: String,
}

impl Message {
    pub fn new(chat_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            is_group: false,
            text: String::new(),
            command: None,
            args: Vec::new(),
            timestamp: Utc::now(),
            platform: "unknown".to_string(),
        }
    }

    pub fn from_text(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        let chat_id = chat_id.into();
        let mut msg = Self::new(chat_id.clone(), chat_id);
        msg.text = text.into();
        msg
    }

    pub fn from_command(chat_id: impl Into<String>, name: impl Into<String>, args: Vec<String>) -> Self {
        let chat_id = chat_id.into();
        let name = name.into();
        let mut msg = Self::new(chat_id.clone(), chat_id);
        msg.text = std::iter::once(format!("/{}", name))
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        msg.command = Some(name);
        msg.args = args;
        msg
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn with_group(mut self, is_group: bool) -> Self {
        self.is_group = is_group;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }
}
