//! Engine-level load commands.

#![allow(clippy::result_large_err)]

use crate::commands::load::{run_full, run_incremental, LoadOptions, LoadReport};
use rusqlite::Connection;
use wareflow_store::errors::Result;
use wareflow_store::ledger::LoadMode;

/// Load commands accepted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadCommand {
    /// Clear everything and reload as batch 1
    Full,
    /// Apply the changes since the previous batch
    Incremental { batch_id: i64 },
}

impl LoadCommand {
    pub fn mode(&self) -> LoadMode {
        match self {
            LoadCommand::Full => LoadMode::Full,
            LoadCommand::Incremental { .. } => LoadMode::Incremental,
        }
    }

    pub fn batch_id(&self) -> i64 {
        match self {
            LoadCommand::Full => crate::commands::load::FULL_LOAD_BATCH_ID,
            LoadCommand::Incremental { batch_id } => *batch_id,
        }
    }
}

/// Apply a load command
pub fn apply_load_command(
    cmd: LoadCommand,
    conn: &mut Connection,
    opts: &LoadOptions<'_>,
) -> Result<LoadReport> {
    match cmd {
        LoadCommand::Full => run_full(conn, opts),
        LoadCommand::Incremental { batch_id } => run_incremental(conn, batch_id, opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_batch_ids() {
        assert_eq!(LoadCommand::Full.batch_id(), 1);
        assert_eq!(LoadCommand::Full.mode(), LoadMode::Full);
        let cmd = LoadCommand::Incremental { batch_id: 20250102 };
        assert_eq!(cmd.batch_id(), 20250102);
        assert_eq!(cmd.mode(), LoadMode::Incremental);
    }
}
