//! Database connection management

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Busy timeout applied by [`open`] unless configured otherwise
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Open and configure a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
}

/// Open and configure a SQLite database with an explicit busy timeout
pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout_ms: u64) -> Result<Connection> {
    let conn = Connection::open(path).map_err(from_rusqlite)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        .map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open a configured in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Enable foreign keys and WAL journaling
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(from_rusqlite)?;

    // journal_mode returns the resulting mode as a row; in-memory databases report "memory"
    let _mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(from_rusqlite)?;

    Ok(())
}
