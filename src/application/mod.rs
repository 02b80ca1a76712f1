//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Services: Worker runtime orchestration
//! - Supervisor: Worker process watchdog and its IPC channel
//! - Errors: Domain-specific errors
//! - Messaging: Message parsing

pub mod errors;
pub mod messaging;
pub mod services;
pub mod supervisor;
