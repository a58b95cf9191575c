//! Runtime configuration
//!
//! Layers, later wins:
//! 1. Built-in defaults
//! 2. `wareflow.toml` (optional)
//! 3. Environment variables `WAREFLOW__<KEY>`, nested keys joined with `__`
//!    (`WAREFLOW__TELEGRAM__CHAT_ID`). `.env` is loaded first when present.

#![allow(clippy::result_large_err)]

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use wareflow_core::errors::{ExError, ExErrorKind};
use wareflow_core::logging_facility::Profile;
use wareflow_core_types::Sensitive;

pub const DEFAULT_CONFIG_FILE: &str = "wareflow.toml";
const ENV_PREFIX: &str = "WAREFLOW";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// SQLite database holding source, warehouse and star tables
    pub database_path: PathBuf,
    pub busy_timeout_ms: u64,
    /// User traffic CSV feed, loaded after the OLTP user traffic
    pub user_traffic_csv: Option<PathBuf>,
    pub log_profile: Profile,
    pub retry: RetryPolicy,
    pub schedule: ScheduleConfig,
    pub telegram: Option<TelegramConfig>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("wareflow.db"),
            busy_timeout_ms: 5_000,
            user_traffic_csv: None,
            log_profile: Profile::default(),
            retry: RetryPolicy::default(),
            schedule: ScheduleConfig::default(),
            telegram: None,
        }
    }
}

/// Scheduler cadence
///
/// Batch ids are calendar dates, so a day holds one batch. Ticks closer
/// together than a day replay that batch instead of loading new changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Sensitive<String>,
    pub chat_id: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl WarehouseConfig {
    /// Load `.env`, then `path` (usually `wareflow.toml`) and the process
    /// environment
    ///
    /// # Errors
    ///
    /// `Config` if a layer cannot be read or the merged result is invalid.
    pub fn load(path: &Path) -> Result<Self, ExError> {
        // a missing .env is normal
        let _ = dotenvy::dotenv();
        Self::load_from(path, None)
    }

    /// Load from `path` (optional) and the environment
    ///
    /// `env` replaces the process environment when given.
    ///
    /// # Errors
    ///
    /// `Config` if a layer cannot be read or the merged result is invalid.
    pub fn load_from(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self, ExError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .map_err(|e| config_error(&e.to_string()))?;

        let cfg: WarehouseConfig = settings
            .try_deserialize()
            .map_err(|e| config_error(&e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// `Config` naming the first invalid setting.
    pub fn validate(&self) -> Result<(), ExError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(config_error("database_path is empty"));
        }
        if self.schedule.interval_secs == 0 {
            return Err(config_error("schedule.interval_secs must be > 0"));
        }
        if let Some(telegram) = &self.telegram {
            if telegram.bot_token.expose().trim().is_empty() || telegram.chat_id.trim().is_empty()
            {
                return Err(config_error("telegram.bot_token and telegram.chat_id are required"));
            }
        }
        self.retry.validate()
    }
}

fn config_error(message: &str) -> ExError {
    ExError::new(ExErrorKind::Config)
        .with_op("load_config")
        .with_message(message)
}
