//! Schema migrations
//!
//! SQL files under `migrations/` are embedded at compile time and applied in
//! order, each in its own transaction. `schema_version` records the SHA-256
//! of every applied file; a recorded checksum that no longer matches the
//! embedded SQL stops the run.

mod catalog;
mod runner;

pub use runner::{apply_migrations, applied_migrations, AppliedMigration};
