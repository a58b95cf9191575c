#![allow(clippy::result_large_err)]

use super::catalog::{Migration, MIGRATIONS};
use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA_VERSION_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    migration_id TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL,
    checksum TEXT NOT NULL
)";

/// A row of `schema_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub migration_id: String,
    pub checksum: String,
}

/// Bring the schema up to date
///
/// # Errors
///
/// `InvariantViolation` when a recorded checksum differs from the embedded
/// SQL; `Migration` when a script fails (that script is rolled back).
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute(SCHEMA_VERSION_DDL, []).map_err(from_rusqlite)?;

    let mut applied = 0;
    for migration in &MIGRATIONS {
        if apply_one(conn, migration)? {
            applied += 1;
        }
    }
    if applied > 0 {
        tracing::info!(
            component = module_path!(),
            op = "apply_migrations",
            applied,
            "schema migrated"
        );
    }
    Ok(())
}

/// `schema_version` rows in application order
///
/// # Errors
///
/// Database errors only.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    let mut stmt = conn
        .prepare("SELECT migration_id, checksum FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                migration_id: row.get(0)?,
                checksum: row.get(1)?,
            })
        })
        .map_err(from_rusqlite)?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(from_rusqlite)
}

/// Returns whether the migration ran
fn apply_one(conn: &mut Connection, migration: &Migration) -> Result<bool> {
    let checksum = migration.checksum();
    let recorded: Option<String> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?1",
            [migration.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    match recorded {
        Some(recorded) if recorded == checksum => return Ok(false),
        Some(recorded) => return Err(checksum_mismatch(migration.id, &recorded, &checksum)),
        None => {}
    }

    let tx = conn.transaction().map_err(from_rusqlite)?;
    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?1, ?2, ?3)",
        params![migration.id, chrono::Utc::now().naive_utc(), checksum],
    )
    .map_err(from_rusqlite)?;
    tx.commit().map_err(from_rusqlite)?;

    tracing::debug!(
        component = module_path!(),
        op = "apply_migration",
        migration_id = migration.id,
        "migration applied"
    );
    Ok(true)
}
