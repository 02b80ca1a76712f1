//! Domain entities - Core business objects with no external dependencies

pub mod command;
pub mod message;

pub use command::{CommandHandler, CommandRegistry, HandlerFn, HandlerFuture, RegisterOutcome};
pub use message::{Message, RawMessage};
