//! wareflow core - in-memory semantics of the SCD2 warehouse load
//!
//! This crate holds everything that does not need a database handle:
//! - Entity records, business keys and audit columns for every entity type
//! - The change detector (New / Changed / Unchanged classification)
//! - The surrogate key resolver seam
//! - Calendar dimension and traffic attribution rules used by the fact rebuild
//! - The error and logging facilities shared by the other crates
//! - The notifier seam and the clock

pub mod attribution;
pub mod calendar;
pub mod clock;
pub mod detect;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod notify;
pub mod resolve;

pub use wareflow_core_types;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use detect::{detect, ChangeSet, ChangedRow, Tracked};
pub use errors::{ExError, ExErrorKind, Result, WarehouseError};
pub use model::{AuditColumns, EntityKind, Snapshot, SourceFeed, VersionEnd};
pub use notify::{notify_best_effort, NoopNotifier, Notifier};
pub use resolve::{KeyResolver, MapResolver};
