//! wareflow CLI
//!
//! Command-line interface for the warehouse load

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "wareflow")]
#[command(about = "wareflow - SCD2 warehouse load and star schema rebuild", long_about = None)]
struct Cli {
    /// Configuration file, layered under WAREFLOW__* environment variables
    #[arg(long, global = true, default_value = wareflow_engine::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Source seeding operations
    Seed(commands::seed::SeedArgs),
    /// Run a full or incremental load
    Load(commands::load::LoadArgs),
    /// Run incremental loads on an interval
    Schedule(commands::schedule::ScheduleArgs),
    /// Clear warehouse and/or star schema tables
    Clear(commands::clear::ClearArgs),
    /// Print the batch ledger as JSON
    Ledger,
}

fn main() {
    let cli = Cli::parse();

    let result = commands::Env::load(&cli.config).and_then(|env| match cli.command {
        Commands::Migrate => commands::migrate::execute(&env),
        Commands::Seed(args) => commands::seed::execute(&env, args),
        Commands::Load(args) => commands::load::execute(&env, args),
        Commands::Schedule(args) => commands::schedule::execute(&env, args),
        Commands::Clear(args) => commands::clear::execute(&env, args),
        Commands::Ledger => commands::ledger::execute(&env),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
