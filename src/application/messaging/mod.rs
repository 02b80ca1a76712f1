//! Message handling - Normalization of inbound payloads

pub mod parser;

pub use parser::MessageParser;
