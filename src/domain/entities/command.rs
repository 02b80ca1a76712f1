use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::application::errors::CommandError;
use crate::domain::entities::Message;
use crate::domain::traits::Connection;

/// Future returned by a command handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), CommandError>> + Send>>;

/// Command handler function type
pub type HandlerFn = Arc<dyn Fn(Arc<dyn Connection>, Message, Vec<String>) -> HandlerFuture + Send + Sync>;

/// Represents a bot command, reachable under one or more tokens
pub struct CommandHandler {
    pub tokens: Vec<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
    /// Inherited from the owning plugin at load time
    pub category: Option<String>,
    handler: Option<HandlerFn>,
}

impl CommandHandler {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            description: None,
            usage: None,
            category: None,
            handler: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<dyn Connection>, Message, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(
            move |conn: Arc<dyn Connection>, msg: Message, args: Vec<String>| -> HandlerFuture {
                Box::pin(handler(conn, msg, args))
            },
        );
        self.handler = Some(handler);
        self
    }

    /// Replace the handler function, keeping the metadata
    pub fn with_handler_fn(mut self, handler: HandlerFn) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn handler_fn(&self) -> Option<HandlerFn> {
        self.handler.clone()
    }

    /// First declared token, used in listings
    pub fn primary_token(&self) -> &str {
        self.tokens.first().map(String::as_str).unwrap_or("")
    }

    pub fn matches(&self, input: &str) -> bool {
        self.tokens.iter().any(|t| t.eq_ignore_ascii_case(input))
    }

    pub async fn invoke(&self, conn: Arc<dyn Connection>, message: Message, args: Vec<String>) -> Result<(), CommandError> {
        match &self.handler {
            Some(handler) => handler(conn, message, args).await,
            None => Err(CommandError::ExecutionFailed(format!(
                "Command {} not implemented",
                self.primary_token()
            ))),
        }
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandler")
            .field("tokens", &self.tokens)
            .field("description", &self.description)
            .field("category", &self.category)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Result of a best-effort registration
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub registered: Vec<String>,
    pub collisions: Vec<String>,
}

/// Command registry: lower-cased token -> handler.
///
/// The first registrant of a token keeps it; later duplicates are logged and skipped.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<CommandHandler>) -> RegisterOutcome {
        let mut outcome = RegisterOutcome::default();

        for token in &handler.tokens {
            let key = token.trim().to_lowercase();
            if key.is_empty() {
                tracing::warn!("Skipping empty command token in {:?}", handler.tokens);
                continue;
            }

            if let Some(existing) = self.commands.get(&key) {
                if !Arc::ptr_eq(existing, &handler) {
                    tracing::warn!(
                        token = %key,
                        owner = existing.primary_token(),
                        "Command collision: '{}' is already registered, keeping the first handler",
                        key
                    );
                    outcome.collisions.push(key);
                }
                continue;
            }

            self.commands.insert(key.clone(), handler.clone());
            outcome.registered.push(key);
        }

        outcome
    }

    pub fn lookup(&self, token: &str) -> Option<Arc<CommandHandler>> {
        self.commands.get(&token.trim().to_lowercase()).cloned()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.commands.contains_key(&token.trim().to_lowercase())
    }

    /// Remove every token pointing at `handler`
    pub fn unregister_all(&mut self, handler: &Arc<CommandHandler>) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, h| !Arc::ptr_eq(h, handler));
        before - self.commands.len()
    }

    /// Owned copy for enumeration
    pub fn snapshot(&self) -> BTreeMap<String, Arc<CommandHandler>> {
        self.commands
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(tokens: &[&str]) -> Arc<CommandHandler> {
        Arc::new(CommandHandler::new(tokens.iter().copied()))
    }

    #[test]
    fn test_first_registrant_wins() {
        let mut registry = CommandRegistry::new();
        let first = handler(&["ping"]);
        let second = handler(&["PING", "latency"]);

        registry.register(first.clone());
        let outcome = registry.register(second.clone());

        assert_eq!(outcome.collisions, vec!["ping".to_string()]);
        assert_eq!(outcome.registered, vec!["latency".to_string()]);
        assert!(Arc::ptr_eq(&registry.lookup("ping").unwrap(), &first));
        assert!(Arc::ptr_eq(&registry.lookup("latency").unwrap(), &second));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = CommandRegistry::new();
        registry.register(handler(&["Help", "menu"]));

        assert!(registry.lookup("HELP").is_some());
        assert!(registry.lookup("help").is_some());
        assert!(registry.lookup("MeNu").is_some());
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn test_unregister_all_only_removes_owned_tokens() {
        let mut registry = CommandRegistry::new();
        let a = handler(&["a1", "a2"]);
        let b = handler(&["b1"]);
        registry.register(a.clone());
        registry.register(b.clone());

        assert_eq!(registry.unregister_all(&a), 2);
        assert!(registry.lookup("a1").is_none());
        assert!(registry.lookup("b1").is_some());
        assert_eq!(registry.unregister_all(&a), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = CommandRegistry::new();
        registry.register(handler(&["one"]));
        let snapshot = registry.snapshot();

        registry.register(handler(&["two"]));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_tokens_are_skipped() {
        let mut registry = CommandRegistry::new();
        let outcome = registry.register(handler(&["", "  ", "ok"]));
        assert_eq!(outcome.registered, vec!["ok".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_without_handler_fails() {
        struct Null;
        #[async_trait::async_trait]
        impl Connection for Null {
            async fn send(&self, _: &str, _: &str, _: crate::domain::traits::SendOptions) -> Result<String, crate::application::errors::BotError> {
                Ok(String::new())
            }
        }

        let cmd = CommandHandler::new(["noop"]);
        let result = cmd.invoke(Arc::new(Null), Message::from_text("c", "hi"), vec![]).await;
        assert!(matches!(result, Err(CommandError::ExecutionFailed(_))));
    }
}
