//! Migrate command
//!
//! Usage: wareflow migrate

use crate::commands::{CliResult, Env};
use wareflow_store::migrations;

pub fn execute(env: &Env) -> CliResult {
    let conn = env.open_database()?;
    for applied in migrations::applied_migrations(&conn)? {
        println!("✓ {} ({})", applied.migration_id, &applied.checksum[..12.min(applied.checksum.len())]);
    }
    Ok(())
}
