//! wareflow engine - orchestration layer
//!
//! Coordinates the change detector, versioned store and fact rebuilder into
//! full and incremental load runs, and drives them on a schedule with retry
//! and status notification.

pub mod commands;
pub mod config;
pub mod retry;
pub mod scheduler;
pub mod telegram;

pub use commands::engine_command::{apply_load_command, LoadCommand};
pub use commands::load::{LoadOptions, LoadReport, StepReport};
pub use config::WarehouseConfig;
pub use retry::RetryPolicy;
