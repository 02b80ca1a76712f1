//! Domain layer - Core types with no infrastructure dependencies
//! 
//! This layer contains:
//! - Entities: Messages, commands and the command registry
//! - Traits: Abstractions over messaging networks

pub mod entities;
pub mod traits;
