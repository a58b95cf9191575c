//! Run identifiers
//!
//! A `RunId` ties together the log lines, step reports and status message
//! produced by one orchestrator run. Runs of the same batch (a retry, a
//! second scheduler tick) get different run ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Time-ordered identifier of one load run (UUIDv7)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The run id and batch id a load run carries through its steps
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub batch_id: i64,
}

impl RunContext {
    pub fn new(batch_id: i64) -> Self {
        Self {
            run_id: RunId::new(),
            batch_id,
        }
    }
}
