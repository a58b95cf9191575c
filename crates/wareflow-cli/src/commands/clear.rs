//! Clear command
//!
//! Usage: wareflow clear [--warehouse] [--star]

use crate::commands::{CliResult, Env};
use clap::Args;
use wareflow_store::truncate;

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Clear the warehouse tables and the batch ledger
    #[arg(long, required_unless_present = "star")]
    pub warehouse: bool,

    /// Clear the star schema tables
    #[arg(long)]
    pub star: bool,
}

pub fn execute(env: &Env, args: ClearArgs) -> CliResult {
    let mut conn = env.open_database()?;
    match (args.warehouse, args.star) {
        (true, true) => truncate::clear_all(&mut conn)?,
        (true, false) => truncate::clear_warehouse(&mut conn)?,
        (false, true) => truncate::clear_star_schema(&mut conn)?,
        (false, false) => return Err("nothing to clear: pass --warehouse and/or --star".into()),
    }
    println!("✓ Cleared");
    Ok(())
}
