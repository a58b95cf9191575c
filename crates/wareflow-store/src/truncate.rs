//! Table truncation
//!
//! Clearing resets the AUTOINCREMENT counters, so a reload numbers surrogate
//! keys from 1 again.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use wareflow_core::model::EntityKind;

const STAR_TABLES: [&str; 6] = [
    "fact_sales",
    "dim_user",
    "dim_course",
    "dim_traffic_source",
    "dim_sales_manager",
    "dim_date",
];

/// Re-create the `Unknown` traffic source row
pub(crate) fn insert_unknown_traffic_source(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO dim_traffic_source
            (traffic_source_key, traffic_source_id, name, channel)
         VALUES (-1, -1, 'Unknown', 'unknown')",
        [],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Delete every warehouse row, children first
pub(crate) fn clear_warehouse_tables(conn: &Connection) -> Result<()> {
    for kind in EntityKind::TOPOLOGICAL.iter().rev() {
        let table = kind.warehouse_table();
        conn.execute(&format!("DELETE FROM {table}"), [])
            .map_err(from_rusqlite)?;
        reset_sequence(conn, table)?;
    }
    Ok(())
}

/// Delete every star schema row, keeping only the `Unknown` traffic source
pub(crate) fn clear_star_tables(conn: &Connection) -> Result<()> {
    for table in STAR_TABLES {
        conn.execute(&format!("DELETE FROM {table}"), [])
            .map_err(from_rusqlite)?;
    }
    insert_unknown_traffic_source(conn)
}

pub(crate) fn clear_ledger_table(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM etl_batch_log", [])
        .map_err(from_rusqlite)?;
    reset_sequence(conn, "etl_batch_log")
}

fn reset_sequence(conn: &Connection, table: &str) -> Result<()> {
    conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [table])
        .map_err(from_rusqlite)?;
    Ok(())
}

/// Clear the warehouse and the batch ledger in one transaction
///
/// The star schema references nothing in the warehouse and is left alone.
pub fn clear_warehouse(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    clear_warehouse_tables(&tx)?;
    clear_ledger_table(&tx)?;
    tx.commit().map_err(from_rusqlite)?;
    tracing::info!(component = module_path!(), op = "clear_warehouse", "warehouse cleared");
    Ok(())
}

/// Clear every star schema table in one transaction
pub fn clear_star_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    clear_star_tables(&tx)?;
    tx.commit().map_err(from_rusqlite)?;
    tracing::info!(component = module_path!(), op = "clear_star_schema", "star schema cleared");
    Ok(())
}

/// Clear warehouse, star schema and ledger in one transaction
pub fn clear_all(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    clear_star_tables(&tx)?;
    clear_warehouse_tables(&tx)?;
    clear_ledger_table(&tx)?;
    tx.commit().map_err(from_rusqlite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrations};

    fn setup() -> Connection {
        let mut conn = db::open_in_memory().unwrap();
        migrations::apply_migrations(&mut conn).unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_clear_warehouse_resets_surrogate_keys() {
        let mut conn = setup();
        let insert = "INSERT INTO wh_users (user_id, first_name, last_name, email,
                registered_at, start_date, insert_batch_id)
             VALUES (1, 'A', 'B', 'a@b', '2025-01-01 00:00:00', '2025-01-01 00:00:00', 1)";
        conn.execute(insert, []).unwrap();
        conn.execute(insert.replace("(1, 'A'", "(2, 'A'").as_str(), [])
            .unwrap();

        clear_warehouse(&mut conn).unwrap();
        assert_eq!(count(&conn, "wh_users"), 0);

        conn.execute(insert, []).unwrap();
        let sk: i64 = conn
            .query_row("SELECT user_sk FROM wh_users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sk, 1);
    }

    #[test]
    fn test_clear_star_keeps_unknown_traffic_source() {
        let mut conn = setup();
        conn.execute(
            "INSERT INTO dim_traffic_source VALUES (5, 3, 'Search', 'organic')",
            [],
        )
        .unwrap();

        clear_star_schema(&mut conn).unwrap();

        let rows: Vec<(i64, String)> = conn
            .prepare("SELECT traffic_source_key, name FROM dim_traffic_source")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![(-1, "Unknown".to_string())]);
    }
}
