//! wareflow store - SQLite persistence for the source, warehouse and star schema
//!
//! Provides:
//! - Connection setup and embedded migrations
//! - Source table reader, YAML seed importer and the user traffic CSV feed
//! - The SCD2 versioned store and its surrogate key resolver
//! - The fact rebuilder for the star schema
//! - The batch ledger and table truncation

pub mod csv_feed;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod migrations;
pub mod seed;
pub mod source;
pub mod star;
pub mod truncate;
pub mod versioned;

// Re-export key types
pub use errors::Result;
pub use ledger::{LedgerEntry, LoadMode};
pub use star::{rebuild, RebuildMode, RebuildSummary};
pub use versioned::{apply_changes, bulk_load, SqliteKeyResolver, StepContext, StepCounts, Versioned};
