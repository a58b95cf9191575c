//! SCD2 audit columns

use super::entity::SourceFeed;
use chrono::NaiveDateTime;
use std::fmt;

/// Text stored in `end_date` while a version is open
pub const OPEN_END_DATE: &str = "9999-12-31";

/// End of a version's validity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionEnd {
    Open,
    Closed(NaiveDateTime),
}

impl VersionEnd {
    pub fn is_open(&self) -> bool {
        matches!(self, VersionEnd::Open)
    }

    /// Parse the persisted `end_date` text
    pub fn parse(text: &str) -> Option<Self> {
        if text == OPEN_END_DATE {
            return Some(VersionEnd::Open);
        }
        crate::calendar::parse_timestamp(text).map(VersionEnd::Closed)
    }

    /// Text persisted in `end_date`
    pub fn to_column(&self) -> String {
        match self {
            VersionEnd::Open => OPEN_END_DATE.to_string(),
            VersionEnd::Closed(at) => crate::calendar::format_timestamp(*at),
        }
    }
}

impl fmt::Display for VersionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_column())
    }
}

/// Audit columns carried by every warehouse snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditColumns {
    pub start_date: NaiveDateTime,
    pub end_date: VersionEnd,
    pub insert_batch_id: i64,
    pub update_batch_id: Option<i64>,
    pub source: SourceFeed,
}

/// One persisted version of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<R> {
    pub surrogate_key: i64,
    pub record: R,
    pub audit: AuditColumns,
}

impl<R> Snapshot<R> {
    pub fn is_active(&self) -> bool {
        self.audit.end_date.is_open()
    }
}
