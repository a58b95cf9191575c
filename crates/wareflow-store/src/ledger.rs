//! Batch ledger
//!
//! Records every applied entity step so a retried batch can skip the steps
//! that already committed.

#![allow(clippy::result_large_err)]

use crate::errors::{corrupt_value, from_rusqlite, Result};
use crate::versioned::StepCounts;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use wareflow_core::model::{EntityKind, SourceFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    Full,
    Incremental,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Full => "full",
            LoadMode::Incremental => "incremental",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "full" => Some(LoadMode::Full),
            "incremental" => Some(LoadMode::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied entity step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub batch_id: i64,
    pub entity: EntityKind,
    pub source: SourceFeed,
    pub mode: LoadMode,
    pub counts: StepCounts,
    pub applied_at: NaiveDateTime,
}

/// Record a step; call inside the step's transaction
pub fn record_step(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO etl_batch_log (batch_id, entity, source_identifier, mode, new_count,
            changed_count, unchanged_count, skipped_count, applied_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.batch_id,
            entry.entity.name(),
            entry.source.id(),
            entry.mode.as_str(),
            entry.counts.new as i64,
            entry.counts.changed as i64,
            entry.counts.unchanged as i64,
            entry.counts.skipped as i64,
            entry.applied_at,
        ],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// The recorded step, if this batch already applied it
pub fn find_step(
    conn: &Connection,
    batch_id: i64,
    entity: EntityKind,
    source: SourceFeed,
) -> Result<Option<LedgerEntry>> {
    let row = conn
        .query_row(
            "SELECT batch_id, entity, source_identifier, mode, new_count, changed_count,
                    unchanged_count, skipped_count, applied_at
             FROM etl_batch_log
             WHERE batch_id = ?1 AND entity = ?2 AND source_identifier = ?3",
            params![batch_id, entity.name(), source.id()],
            raw_entry,
        )
        .optional()
        .map_err(from_rusqlite)?;
    row.map(decode).transpose()
}

/// Highest batch id recorded so far
pub fn max_batch_id(conn: &Connection) -> Result<Option<i64>> {
    conn.query_row("SELECT MAX(batch_id) FROM etl_batch_log", [], |row| {
        row.get(0)
    })
    .map_err(from_rusqlite)
}

/// Every entry, oldest batch first
pub fn list_entries(conn: &Connection) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT batch_id, entity, source_identifier, mode, new_count, changed_count,
                    unchanged_count, skipped_count, applied_at
             FROM etl_batch_log ORDER BY batch_id, id",
        )
        .map_err(from_rusqlite)?;
    let raw = stmt
        .query_map([], raw_entry)
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    raw.into_iter().map(decode).collect()
}

struct RawEntry {
    batch_id: i64,
    entity: String,
    source_identifier: i64,
    mode: String,
    counts: [i64; 4],
    applied_at: NaiveDateTime,
}

fn raw_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        batch_id: row.get(0)?,
        entity: row.get(1)?,
        source_identifier: row.get(2)?,
        mode: row.get(3)?,
        counts: [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
        applied_at: row.get(8)?,
    })
}

fn decode(raw: RawEntry) -> Result<LedgerEntry> {
    let entity = EntityKind::from_name(&raw.entity)
        .ok_or_else(|| corrupt_value("etl_batch_log", "entity", &raw.entity))?;
    let source = SourceFeed::from_id(raw.source_identifier).ok_or_else(|| {
        corrupt_value(
            "etl_batch_log",
            "source_identifier",
            &raw.source_identifier.to_string(),
        )
    })?;
    let mode = LoadMode::parse(&raw.mode)
        .ok_or_else(|| corrupt_value("etl_batch_log", "mode", &raw.mode))?;
    let [new, changed, unchanged, skipped] = raw.counts.map(|c| c.max(0) as usize);
    Ok(LedgerEntry {
        batch_id: raw.batch_id,
        entity,
        source,
        mode,
        counts: StepCounts {
            new,
            changed,
            unchanged,
            skipped,
        },
        applied_at: raw.applied_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrations};
    use chrono::NaiveDate;

    fn setup() -> Connection {
        let mut conn = db::open_in_memory().unwrap();
        migrations::apply_migrations(&mut conn).unwrap();
        conn
    }

    fn entry(batch_id: i64, entity: EntityKind, source: SourceFeed) -> LedgerEntry {
        LedgerEntry {
            batch_id,
            entity,
            source,
            mode: LoadMode::Incremental,
            counts: StepCounts {
                new: 1,
                changed: 2,
                unchanged: 3,
                skipped: 0,
            },
            applied_at: NaiveDate::from_ymd_opt(2025, 1, 2)
                .unwrap()
                .and_hms_opt(3, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_record_and_find() {
        let conn = setup();
        let recorded = entry(20250102, EntityKind::Sale, SourceFeed::Oltp);
        record_step(&conn, &recorded).unwrap();

        let found = find_step(&conn, 20250102, EntityKind::Sale, SourceFeed::Oltp).unwrap();
        assert_eq!(found, Some(recorded));
        assert_eq!(
            find_step(&conn, 20250102, EntityKind::Sale, SourceFeed::Csv).unwrap(),
            None
        );
    }

    #[test]
    fn test_duplicate_step_is_rejected() {
        let conn = setup();
        let recorded = entry(2, EntityKind::User, SourceFeed::Oltp);
        record_step(&conn, &recorded).unwrap();
        assert!(record_step(&conn, &recorded).is_err());
    }

    #[test]
    fn test_max_batch_id() {
        let conn = setup();
        assert_eq!(max_batch_id(&conn).unwrap(), None);
        record_step(&conn, &entry(3, EntityKind::User, SourceFeed::Oltp)).unwrap();
        record_step(&conn, &entry(7, EntityKind::User, SourceFeed::Oltp)).unwrap();
        assert_eq!(max_batch_id(&conn).unwrap(), Some(7));
        assert_eq!(list_entries(&conn).unwrap().len(), 2);
    }
}
