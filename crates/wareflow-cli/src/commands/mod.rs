//! CLI subcommands

pub mod clear;
pub mod ledger;
pub mod load;
pub mod migrate;
pub mod schedule;
pub mod seed;

use rusqlite::Connection;
use std::path::Path;
use wareflow_core::logging_facility;
use wareflow_engine::WarehouseConfig;
use wareflow_store::{db, migrations};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Configuration shared by every subcommand
pub struct Env {
    pub config: WarehouseConfig,
}

impl Env {
    /// Load `.env`, the config file and the environment, then start logging
    pub fn load(config_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config = WarehouseConfig::load(config_path)?;
        logging_facility::init(config.log_profile);
        Ok(Self { config })
    }

    /// Open the configured database with every migration applied
    pub fn open_database(&self) -> Result<Connection, Box<dyn std::error::Error>> {
        if let Some(parent) = self.config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = db::open_with_timeout(&self.config.database_path, self.config.busy_timeout_ms)?;
        migrations::apply_migrations(&mut conn)?;
        Ok(conn)
    }
}
