//! Load orchestration
//!
//! ## Full load
//! 1. Clear warehouse, star schema and ledger (one transaction)
//! 2. Bulk load every entity type in topological order as batch 1
//! 3. Bulk load the CSV traffic feed, when configured
//! 4. Full rebuild
//!
//! ## Incremental load
//! 1. Per entity type: read source, read active versions, detect, apply
//! 2. CSV traffic feed after the OLTP user traffic, when configured
//! 3. Incremental rebuild
//!
//! Each entity step commits on its own and is recorded in the batch ledger.
//! Retrying a batch replays the recorded counts of committed steps instead
//! of applying them again.

#![allow(clippy::result_large_err)]

use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use wareflow_core::clock::Clock;
use wareflow_core::detect::detect;
use wareflow_core::errors::{ExError, WarehouseError};
use wareflow_core::model::{
    CourseRecord, EnrollmentRecord, EntityKind, SaleRecord, SalesManagerRecord, SourceFeed,
    TrafficSourceRecord, UserRecord, UserTrafficRecord,
};
use wareflow_core::{log_op_end, log_op_error, log_op_start};
use wareflow_core_types::{RunContext, RunId};
use wareflow_store::csv_feed::read_user_traffic_csv;
use wareflow_store::errors::Result;
use wareflow_store::ledger::{self, LoadMode};
use wareflow_store::source::SourceEntity;
use wareflow_store::star::{self, RebuildMode, RebuildSummary};
use wareflow_store::truncate;
use wareflow_store::versioned::{apply_changes, bulk_load, StepContext, StepCounts, Versioned};

/// Batch id reserved for the full load
pub const FULL_LOAD_BATCH_ID: i64 = 1;

/// Inputs shared by both load modes
#[derive(Clone, Copy)]
pub struct LoadOptions<'a> {
    /// Optional user traffic CSV feed
    pub user_traffic_csv: Option<&'a Path>,
    pub clock: &'a dyn Clock,
}

/// Outcome of one entity step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub entity: EntityKind,
    pub source: SourceFeed,
    pub counts: StepCounts,
    /// The step was already in the ledger for this batch
    pub replayed: bool,
}

/// Outcome of a load run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: RunId,
    pub mode: LoadMode,
    pub batch_id: i64,
    pub steps: Vec<StepReport>,
    pub rebuild: RebuildSummary,
    pub duration_ms: u64,
}

impl LoadReport {
    /// Step counts summed over every step
    pub fn totals(&self) -> StepCounts {
        self.steps
            .iter()
            .fold(StepCounts::default(), |mut acc, step| {
                acc.new += step.counts.new;
                acc.changed += step.counts.changed;
                acc.unchanged += step.counts.unchanged;
                acc.skipped += step.counts.skipped;
                acc
            })
    }

    /// Text forwarded to the notifier
    pub fn status_message(&self) -> String {
        let totals = self.totals();
        format!(
            "{} load completed for batch {}: {} new, {} changed, {} unchanged, {} skipped; {} fact rows",
            mode_title(self.mode),
            self.batch_id,
            totals.new,
            totals.changed,
            totals.unchanged,
            totals.skipped,
            self.rebuild.facts
        )
    }
}

/// Text forwarded to the notifier when a run fails
pub fn failure_message(mode: LoadMode, batch_id: i64, err: &ExError) -> String {
    format!(
        "{} load failed for batch {}: {}",
        mode_title(mode),
        batch_id,
        err
    )
}

fn mode_title(mode: LoadMode) -> &'static str {
    match mode {
        LoadMode::Full => "Full",
        LoadMode::Incremental => "Incremental",
    }
}

/// Rebuild the warehouse and the star schema from scratch
///
/// # Errors
///
/// Any step error aborts the run; steps committed before it stay committed.
pub fn run_full(conn: &mut Connection, opts: &LoadOptions<'_>) -> Result<LoadReport> {
    let run = RunContext::new(FULL_LOAD_BATCH_ID);
    run_logged(conn, run, LoadMode::Full, opts)
}

/// Load the changes since the previous batch
///
/// # Errors
///
/// - `InvalidInput` if `batch_id` is not above the full load batch id
/// - any step error, which aborts the run
pub fn run_incremental(
    conn: &mut Connection,
    batch_id: i64,
    opts: &LoadOptions<'_>,
) -> Result<LoadReport> {
    if batch_id <= FULL_LOAD_BATCH_ID {
        return Err(WarehouseError::InvalidBatchId {
            batch_id,
            reason: format!("must be greater than {}", FULL_LOAD_BATCH_ID),
        }
        .into());
    }
    run_logged(conn, RunContext::new(batch_id), LoadMode::Incremental, opts)
}

fn run_logged(
    conn: &mut Connection,
    run: RunContext,
    mode: LoadMode,
    opts: &LoadOptions<'_>,
) -> Result<LoadReport> {
    let op = match mode {
        LoadMode::Full => "run_full",
        LoadMode::Incremental => "run_incremental",
    };
    let start = Instant::now();
    log_op_start!(op, run_id = %run.run_id, batch_id = run.batch_id);

    let result = run_steps(conn, &run, mode, opts).map(|(steps, rebuild)| LoadReport {
        run_id: run.run_id.clone(),
        mode,
        batch_id: run.batch_id,
        steps,
        rebuild,
        duration_ms: start.elapsed().as_millis() as u64,
    });
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(report) => {
            let totals = report.totals();
            log_op_end!(
                op,
                duration_ms = duration_ms,
                run_id = %run.run_id,
                batch_id = run.batch_id,
                new_count = totals.new,
                changed_count = totals.changed,
                skipped_count = totals.skipped,
                facts = report.rebuild.facts
            );
        }
        Err(err) => {
            log_op_error!(
                op,
                err.clone(),
                duration_ms = duration_ms,
                run_id = %run.run_id,
                batch_id = run.batch_id
            );
        }
    }

    result.map_err(|e| match e.batch_id() {
        Some(_) => e,
        None => e.with_batch_id(run.batch_id),
    })
}

fn run_steps(
    conn: &mut Connection,
    run: &RunContext,
    mode: LoadMode,
    opts: &LoadOptions<'_>,
) -> Result<(Vec<StepReport>, RebuildSummary)> {
    match mode {
        LoadMode::Full => truncate::clear_all(conn)?,
        LoadMode::Incremental => warn_if_out_of_order(conn, run.batch_id)?,
    }

    let oltp = StepContext {
        batch_id: run.batch_id,
        source: SourceFeed::Oltp,
        mode,
        clock: opts.clock,
    };
    let mut steps = Vec::with_capacity(EntityKind::TOPOLOGICAL.len() + 1);
    for kind in EntityKind::TOPOLOGICAL {
        steps.push(run_step(conn, kind, &oltp)?);
    }

    if let Some(path) = opts.user_traffic_csv {
        let csv = StepContext {
            source: SourceFeed::Csv,
            ..oltp
        };
        steps.push(replay_or_apply(conn, EntityKind::UserTraffic, &csv, |conn| {
            let rows = read_user_traffic_csv(path)?;
            load_rows(conn, rows, &csv)
        })?);
    }

    let rebuild_mode = match mode {
        LoadMode::Full => RebuildMode::Full,
        LoadMode::Incremental => RebuildMode::Incremental,
    };
    let rebuild = star::rebuild(conn, rebuild_mode, run.batch_id, opts.clock)?;
    Ok((steps, rebuild))
}

fn warn_if_out_of_order(conn: &Connection, batch_id: i64) -> Result<()> {
    if let Some(max) = ledger::max_batch_id(conn)? {
        if batch_id < max {
            tracing::warn!(
                component = module_path!(),
                op = "run_incremental",
                batch_id,
                max_batch_id = max,
                "batch id is lower than the highest recorded batch"
            );
        }
    }
    Ok(())
}

fn run_step(conn: &mut Connection, kind: EntityKind, ctx: &StepContext<'_>) -> Result<StepReport> {
    replay_or_apply(conn, kind, ctx, |conn| match kind {
        EntityKind::User => load_source::<UserRecord>(conn, ctx),
        EntityKind::SalesManager => load_source::<SalesManagerRecord>(conn, ctx),
        EntityKind::TrafficSource => load_source::<TrafficSourceRecord>(conn, ctx),
        EntityKind::Course => load_source::<CourseRecord>(conn, ctx),
        EntityKind::Enrollment => load_source::<EnrollmentRecord>(conn, ctx),
        EntityKind::Sale => load_source::<SaleRecord>(conn, ctx),
        EntityKind::UserTraffic => load_source::<UserTrafficRecord>(conn, ctx),
    })
}

/// Apply a step unless the ledger already holds it for this batch
fn replay_or_apply<F>(
    conn: &mut Connection,
    kind: EntityKind,
    ctx: &StepContext<'_>,
    apply: F,
) -> Result<StepReport>
where
    F: FnOnce(&mut Connection) -> Result<StepCounts>,
{
    if let Some(entry) = ledger::find_step(conn, ctx.batch_id, kind, ctx.source)? {
        tracing::info!(
            component = module_path!(),
            op = "load_step",
            entity = kind.name(),
            batch_id = ctx.batch_id,
            source_identifier = ctx.source.id(),
            "step already applied for this batch, skipping"
        );
        return Ok(StepReport {
            entity: kind,
            source: ctx.source,
            counts: entry.counts,
            replayed: true,
        });
    }

    let counts = apply(conn)?;
    Ok(StepReport {
        entity: kind,
        source: ctx.source,
        counts,
        replayed: false,
    })
}

fn load_source<R: SourceEntity + Versioned>(
    conn: &mut Connection,
    ctx: &StepContext<'_>,
) -> Result<StepCounts> {
    let rows = R::read_source(conn)?;
    load_rows(conn, rows, ctx)
}

fn load_rows<R: Versioned>(
    conn: &mut Connection,
    rows: Vec<R>,
    ctx: &StepContext<'_>,
) -> Result<StepCounts> {
    match ctx.mode {
        LoadMode::Full => bulk_load(conn, rows, ctx),
        LoadMode::Incremental => {
            let active = R::load_active(conn)?;
            let change_set = detect(&rows, &active)?;
            apply_changes(conn, &change_set, ctx)
        }
    }
}
