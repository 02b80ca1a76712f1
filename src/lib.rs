//! sambung-bot - plugin dispatch engine and worker supervisor for chat bots

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;
