//! Load command
//!
//! Usage:
//!   wareflow load full
//!   wareflow load incremental (--batch-id <N> | --date <YYYY-MM-DD>)

use crate::commands::{CliResult, Env};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use wareflow_core::calendar::batch_id_for;
use wareflow_core::clock::SystemClock;
use wareflow_engine::commands::load::LoadOptions;
use wareflow_engine::{apply_load_command, LoadCommand};

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(subcommand)]
    pub command: LoadSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum LoadSubcommand {
    /// Clear the warehouse and reload everything as batch 1
    Full,
    /// Load the changes since the previous batch
    Incremental(IncrementalArgs),
}

#[derive(Debug, Args)]
pub struct IncrementalArgs {
    /// Explicit batch id
    #[arg(long, conflicts_with = "date", required_unless_present = "date")]
    pub batch_id: Option<i64>,

    /// Logical date; the batch id becomes YYYYMMDD
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

pub fn execute(env: &Env, args: LoadArgs) -> CliResult {
    let cmd = match args.command {
        LoadSubcommand::Full => LoadCommand::Full,
        LoadSubcommand::Incremental(inc) => {
            let batch_id = match (inc.batch_id, inc.date) {
                (Some(batch_id), _) => batch_id,
                (None, Some(date)) => batch_id_for(date),
                (None, None) => return Err("either --batch-id or --date is required".into()),
            };
            LoadCommand::Incremental { batch_id }
        }
    };

    let mut conn = env.open_database()?;
    let clock = SystemClock;
    let opts = LoadOptions {
        user_traffic_csv: env.config.user_traffic_csv.as_deref(),
        clock: &clock,
    };

    let report = apply_load_command(cmd, &mut conn, &opts)?;
    for step in &report.steps {
        println!(
            "{:<15} {:<4} new={} changed={} unchanged={} skipped={}{}",
            step.entity.name(),
            step.source,
            step.counts.new,
            step.counts.changed,
            step.counts.unchanged,
            step.counts.skipped,
            if step.replayed { " (already applied)" } else { "" }
        );
    }
    println!("✓ {}", report.status_message());
    Ok(())
}
