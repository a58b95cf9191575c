//! Interval scheduler for incremental loads
//!
//! Each tick derives the batch id from the current date, runs the
//! incremental load under the retry policy and forwards the outcome to the
//! notifier. Ticks on the same date share a batch id, so after the first
//! successful run of a day the ledger turns the rest into replays. The
//! default interval is one day, matching the daily batch.

#![allow(clippy::result_large_err)]

use crate::commands::load::{failure_message, run_incremental, LoadOptions, LoadReport};
use crate::retry::RetryPolicy;
use rusqlite::Connection;
use std::time::Duration;
use wareflow_core::calendar::batch_id_for;
use wareflow_core::notify::{notify_best_effort, Notifier};
use wareflow_store::errors::Result;
use wareflow_store::ledger::LoadMode;

pub struct Scheduler<'a> {
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub notifier: &'a dyn Notifier,
    pub options: LoadOptions<'a>,
}

impl Scheduler<'_> {
    /// Run one scheduled incremental load
    ///
    /// # Errors
    ///
    /// The load error once retries are exhausted. Notification failures are
    /// logged and never returned.
    pub fn run_once(&self, conn: &mut Connection) -> Result<LoadReport> {
        let batch_id = batch_id_for(self.options.clock.today());
        let result = self.retry.run("scheduled_load", |_| {
            run_incremental(conn, batch_id, &self.options)
        });

        let message = match &result {
            Ok(report) => report.status_message(),
            Err(err) => failure_message(LoadMode::Incremental, batch_id, err),
        };
        notify_best_effort(self.notifier, &message);
        result
    }

    /// Run a load every `interval` until the process stops
    pub fn run_forever(&self, conn: &mut Connection) -> ! {
        tracing::info!(
            component = module_path!(),
            op = "schedule",
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );
        loop {
            if let Err(err) = self.run_once(conn) {
                tracing::debug!(
                    component = module_path!(),
                    op = "schedule",
                    err_code = err.code(),
                    "tick failed, waiting for the next one"
                );
            }
            std::thread::sleep(self.interval);
        }
    }
}
