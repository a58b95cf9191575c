//! Command orchestration layer.
//!
//! Provides the load commands that coordinate the core semantics with the
//! persistence layer.

pub mod engine_command;
pub mod load;
