//! Ledger command
//!
//! Usage: wareflow ledger

use crate::commands::{CliResult, Env};
use wareflow_store::ledger;

pub fn execute(env: &Env) -> CliResult {
    let conn = env.open_database()?;
    let entries = ledger::list_entries(&conn)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
