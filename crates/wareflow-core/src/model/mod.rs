//! Warehouse entity model
//!
//! One typed record per entity type, the entity kind catalogue and the
//! SCD2 audit columns shared by every versioned table.

pub mod audit;
pub mod entity;
pub mod records;

pub use audit::{AuditColumns, Snapshot, VersionEnd, OPEN_END_DATE};
pub use entity::{EntityKind, SourceFeed};
pub use records::{
    normalize_optional_text, CourseRecord, EnrollmentRecord, EnrollmentStatus, SaleRecord,
    SalesManagerRecord, TrafficSourceRecord, UserRecord, UserTrafficKey, UserTrafficRecord,
};
