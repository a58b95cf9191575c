//! Seed import command
//!
//! Usage: wareflow seed import <PATH>

use crate::commands::{CliResult, Env};
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct SeedArgs {
    #[command(subcommand)]
    pub command: SeedCommand,
}

#[derive(Debug, Subcommand)]
pub enum SeedCommand {
    /// Upsert a seed file (or a directory of them) into the source tables
    Import(ImportArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Path to seed YAML file or directory
    pub path: PathBuf,
}

pub fn execute(env: &Env, args: SeedArgs) -> CliResult {
    match args.command {
        SeedCommand::Import(import_args) => execute_import(env, import_args),
    }
}

fn execute_import(env: &Env, args: ImportArgs) -> CliResult {
    let mut conn = env.open_database()?;

    let seed_files = if args.path.is_dir() {
        // sorted for determinism
        let mut files: Vec<PathBuf> = std::fs::read_dir(&args.path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    } else {
        vec![args.path]
    };

    for seed_file in seed_files {
        println!("Importing {}...", seed_file.display());
        let summary = wareflow_store::seed::import_seed(&seed_file, &mut conn)?;
        println!("✓ Imported {} rows", summary.total());
    }

    Ok(())
}
