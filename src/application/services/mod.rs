//! Application services - Business logic orchestration

pub mod worker_service;

pub use worker_service::{build_plugin_manager, read_instructions, run_worker, WorkerExit, WorkerLink, WorkerService};
