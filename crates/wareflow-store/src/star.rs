//! Fact rebuilder
//!
//! Derives the star schema from the active warehouse versions. Every rebuild
//! runs in one transaction: on failure the star tables keep their previous
//! contents.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use crate::versioned::Versioned;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;
use wareflow_core::attribution::{latest_referrals, Referral, UNKNOWN_TRAFFIC_SOURCE_KEY};
use wareflow_core::calendar::{self, DateRange};
use wareflow_core::clock::Clock;
use wareflow_core::errors::{ExErrorKind, WarehouseError};
use wareflow_core::model::{
    CourseRecord, EnrollmentRecord, EntityKind, SaleRecord, SalesManagerRecord,
    TrafficSourceRecord, UserRecord, UserTrafficRecord, OPEN_END_DATE,
};
use wareflow_core::resolve::{KeyResolver, MapResolver};
use wareflow_core::{log_op_end, log_op_error, log_op_start};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// Regenerate every dimension, the calendar and every fact
    Full,
    /// Refresh dimensions touched by the batch or holding closed versions,
    /// extend the calendar to every active sale, regenerate every fact
    Incremental,
}

impl fmt::Display for RebuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildMode::Full => f.write_str("full"),
            RebuildMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Rows written by one rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub dim_users: usize,
    pub dim_courses: usize,
    pub dim_traffic_sources: usize,
    pub dim_sales_managers: usize,
    /// Days written to `dim_date`; zero when the calendar was left alone
    pub calendar_days: usize,
    pub facts: usize,
    /// Active sales whose key chain could not be resolved
    pub skipped_sales: usize,
}

/// One dimension derived from a warehouse table
struct Dimension {
    table: &'static str,
    dim_key: &'static str,
    surrogate_key: &'static str,
    dim_business_key: &'static str,
    business_key: &'static str,
    warehouse_table: &'static str,
    columns: &'static str,
    select: &'static str,
}

const DIMENSIONS: [Dimension; 4] = [
    Dimension {
        table: "dim_user",
        dim_key: "user_key",
        surrogate_key: "user_sk",
        dim_business_key: "user_id",
        business_key: "user_id",
        warehouse_table: "wh_users",
        columns: "user_key, user_id, first_name, last_name, email, signup_date, country",
        select: "w.user_sk, w.user_id, w.first_name, w.last_name, w.email, \
                 substr(w.registered_at, 1, 10), w.country",
    },
    Dimension {
        table: "dim_course",
        dim_key: "course_key",
        surrogate_key: "course_sk",
        dim_business_key: "course_id",
        business_key: "course_id",
        warehouse_table: "wh_courses",
        columns: "course_key, course_id, title, subject, price_in_rubbles, category, sub_category",
        select: "w.course_sk, w.course_id, w.title, w.subject, w.price_in_rubbles, \
                 w.category, w.sub_category",
    },
    Dimension {
        table: "dim_traffic_source",
        dim_key: "traffic_source_key",
        surrogate_key: "traffic_source_sk",
        dim_business_key: "traffic_source_id",
        business_key: "source_id",
        warehouse_table: "wh_traffic_sources",
        columns: "traffic_source_key, traffic_source_id, name, channel",
        select: "w.traffic_source_sk, w.source_id, w.name, w.channel",
    },
    Dimension {
        table: "dim_sales_manager",
        dim_key: "sales_manager_key",
        surrogate_key: "sales_manager_sk",
        dim_business_key: "manager_id",
        business_key: "manager_id",
        warehouse_table: "wh_sales_managers",
        columns: "sales_manager_key, manager_id, first_name, last_name, email, hired_at",
        select: "w.sales_manager_sk, w.manager_id, w.first_name, w.last_name, w.email, \
                 w.hired_at",
    },
];

impl Dimension {
    fn clear_all(&self, tx: &Connection) -> Result<()> {
        // the Unknown traffic source row is permanent
        tx.execute(
            &format!("DELETE FROM {} WHERE {} <> -1", self.table, self.dim_business_key),
            [],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    fn clear_touched(&self, tx: &Connection, batch_id: i64) -> Result<()> {
        tx.execute(
            &format!(
                "DELETE FROM {dim} WHERE {dim_bk} IN (
                    SELECT {bk} FROM {wh} WHERE insert_batch_id = ?1 OR update_batch_id = ?1)",
                dim = self.table,
                dim_bk = self.dim_business_key,
                bk = self.business_key,
                wh = self.warehouse_table,
            ),
            [batch_id],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    /// Delete rows whose key is no longer an active version, e.g. left
    /// behind by a batch that failed before its rebuild
    fn clear_stale(&self, tx: &Connection) -> Result<()> {
        tx.execute(
            &format!(
                "DELETE FROM {dim} WHERE {dim_bk} <> -1 AND {key} NOT IN (
                    SELECT {sk} FROM {wh} WHERE end_date = '{OPEN_END_DATE}')",
                dim = self.table,
                dim_bk = self.dim_business_key,
                key = self.dim_key,
                sk = self.surrogate_key,
                wh = self.warehouse_table,
            ),
            [],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }

    /// Insert every active version whose business key has no dimension row
    fn fill_missing(&self, tx: &Connection) -> Result<usize> {
        tx.execute(
            &format!(
                "INSERT INTO {dim} ({columns})
                 SELECT {select} FROM {wh} w
                 WHERE w.end_date = '{OPEN_END_DATE}'
                   AND w.{bk} NOT IN (SELECT {dim_bk} FROM {dim})
                 ORDER BY w.{bk}",
                dim = self.table,
                columns = self.columns,
                select = self.select,
                wh = self.warehouse_table,
                bk = self.business_key,
                dim_bk = self.dim_business_key,
            ),
            [],
        )
        .map_err(from_rusqlite)
    }
}

/// Rebuild the star schema from the active warehouse versions
///
/// `batch_id` selects the touched dimension rows in incremental mode.
///
/// # Errors
///
/// `InvariantViolation` if an active sale falls outside the calendar; any
/// storage error. Either way nothing in the star schema changes.
pub fn rebuild(
    conn: &mut Connection,
    mode: RebuildMode,
    batch_id: i64,
    clock: &dyn Clock,
) -> Result<RebuildSummary> {
    let start = Instant::now();
    log_op_start!("rebuild", mode = %mode, batch_id = batch_id);

    let result = rebuild_in_transaction(conn, mode, batch_id, clock);
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(summary) => {
            log_op_end!(
                "rebuild",
                duration_ms = duration_ms,
                mode = %mode,
                batch_id = batch_id,
                facts = summary.facts,
                skipped_sales = summary.skipped_sales,
                calendar_days = summary.calendar_days
            );
        }
        Err(err) => {
            log_op_error!(
                "rebuild",
                err.clone(),
                duration_ms = duration_ms,
                mode = %mode,
                batch_id = batch_id
            );
        }
    }

    result.map_err(|e| e.with_op("rebuild").with_batch_id(batch_id))
}

fn rebuild_in_transaction(
    conn: &mut Connection,
    mode: RebuildMode,
    batch_id: i64,
    clock: &dyn Clock,
) -> Result<RebuildSummary> {
    let tx = conn.transaction().map_err(from_rusqlite)?;

    // facts reference every dimension, so they go first
    tx.execute("DELETE FROM fact_sales", [])
        .map_err(from_rusqlite)?;

    let mut written = [0usize; 4];
    for (dimension, count) in DIMENSIONS.iter().zip(written.iter_mut()) {
        match mode {
            RebuildMode::Full => dimension.clear_all(&tx)?,
            RebuildMode::Incremental => {
                dimension.clear_touched(&tx, batch_id)?;
                dimension.clear_stale(&tx)?;
            }
        }
        *count = dimension.fill_missing(&tx)?;
    }
    let [dim_users, dim_courses, dim_traffic_sources, dim_sales_managers] = written;
    let mut summary = RebuildSummary {
        dim_users,
        dim_courses,
        dim_traffic_sources,
        dim_sales_managers,
        ..RebuildSummary::default()
    };

    let current_calendar = calendar_range(&tx)?;
    summary.calendar_days = match (mode, current_calendar) {
        // an incremental rebuild after the star schema was cleared starts over
        (RebuildMode::Full, _) | (RebuildMode::Incremental, None) => {
            let range = calendar::full_range(warehouse_event_range(&tx)?, clock.today());
            replace_calendar(&tx, range)?
        }
        (RebuildMode::Incremental, current) => {
            match calendar::extended_range(current, active_sale_range(&tx)?) {
                Some(range) => replace_calendar(&tx, range)?,
                None => 0,
            }
        }
    };

    let (facts, skipped) = rebuild_facts(&tx)?;
    summary.facts = facts;
    summary.skipped_sales = skipped;

    tx.commit().map_err(from_rusqlite)?;
    Ok(summary)
}

// ========== Calendar ==========

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn date_range_query(tx: &Connection, sql: &str) -> Result<Option<DateRange>> {
    let (min, max): (Option<String>, Option<String>) = tx
        .query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(from_rusqlite)?;

    Ok(match (min.as_deref().and_then(parse_date), max.as_deref().and_then(parse_date)) {
        (Some(a), Some(b)) => Some(DateRange::new(a, b)),
        _ => None,
    })
}

/// Span of every event date held by any warehouse version
fn warehouse_event_range(tx: &Connection) -> Result<Option<DateRange>> {
    date_range_query(
        tx,
        "SELECT MIN(d), MAX(d) FROM (
            SELECT substr(registered_at, 1, 10) AS d FROM wh_users
            UNION ALL SELECT substr(created_at, 1, 10) FROM wh_courses
            UNION ALL SELECT substr(enrolled_at, 1, 10) FROM wh_enrollments
            UNION ALL SELECT substr(sale_date, 1, 10) FROM wh_sales
            UNION ALL SELECT substr(referred_at, 1, 10) FROM wh_user_traffic
         )",
    )
}

fn calendar_range(tx: &Connection) -> Result<Option<DateRange>> {
    date_range_query(tx, "SELECT MIN(date), MAX(date) FROM dim_date")
}

/// Span of sale dates among all active sales
///
/// Covers sales committed by an earlier batch that failed before its
/// rebuild, not only those inserted by the current batch.
fn active_sale_range(tx: &Connection) -> Result<Option<DateRange>> {
    date_range_query(
        tx,
        &format!(
            "SELECT MIN(substr(sale_date, 1, 10)), MAX(substr(sale_date, 1, 10))
             FROM wh_sales WHERE end_date = '{OPEN_END_DATE}'"
        ),
    )
}

fn replace_calendar(tx: &Connection, range: DateRange) -> Result<usize> {
    tx.execute("DELETE FROM dim_date", [])
        .map_err(from_rusqlite)?;
    let mut stmt = tx
        .prepare(
            "INSERT INTO dim_date (date_key, date, year, quarter, month, day, weekday)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(from_rusqlite)?;
    let mut days = 0;
    for day in range.days() {
        stmt.execute(params![
            day.date_key,
            day.date.format("%Y-%m-%d").to_string(),
            day.year,
            day.quarter,
            day.month,
            day.day,
            day.weekday
        ])
        .map_err(from_rusqlite)?;
        days += 1;
    }
    Ok(days)
}

// ========== Facts ==========

struct FactRow {
    sale_key: i64,
    sale_id: i64,
    user_key: i64,
    course_key: i64,
    sales_manager_key: i64,
    traffic_source_key: i64,
    campaign_code: Option<String>,
    date_key: i64,
    total_in_rubbles: i64,
}

fn active_key_index(tx: &Connection) -> Result<MapResolver> {
    let mut index = MapResolver::new();
    for s in UserRecord::load_active(tx)? {
        index.insert(EntityKind::User, s.record.user_id, s.surrogate_key);
    }
    for s in CourseRecord::load_active(tx)? {
        index.insert(EntityKind::Course, s.record.course_id, s.surrogate_key);
    }
    for s in SalesManagerRecord::load_active(tx)? {
        index.insert(EntityKind::SalesManager, s.record.manager_id, s.surrogate_key);
    }
    for s in TrafficSourceRecord::load_active(tx)? {
        index.insert(EntityKind::TrafficSource, s.record.source_id, s.surrogate_key);
    }
    Ok(index)
}

fn calendar_keys(tx: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = tx
        .prepare("SELECT date_key FROM dim_date")
        .map_err(from_rusqlite)?;
    let keys = stmt
        .query_map([], |row| row.get(0))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<HashSet<i64>, _>>()
        .map_err(from_rusqlite)?;
    Ok(keys)
}

/// Resolve a key, treating an unresolved reference as a skip
fn lookup(index: &MapResolver, kind: EntityKind, key: i64) -> Result<Option<i64>> {
    match index.resolve(kind, key) {
        Ok(sk) => Ok(Some(sk)),
        Err(err) if err.kind() == ExErrorKind::UnresolvedReference => Ok(None),
        Err(err) => Err(err),
    }
}

fn build_fact(
    sale_key: i64,
    sale: &SaleRecord,
    enrollments: &HashMap<i64, EnrollmentRecord>,
    index: &MapResolver,
    referrals: &std::collections::BTreeMap<i64, Referral>,
) -> Result<Option<FactRow>> {
    let Some(enrollment) = enrollments.get(&sale.enrollment_id) else {
        return Ok(None);
    };
    let Some(user_key) = lookup(index, EntityKind::User, enrollment.user_id)? else {
        return Ok(None);
    };
    let Some(course_key) = lookup(index, EntityKind::Course, enrollment.course_id)? else {
        return Ok(None);
    };
    let Some(sales_manager_key) = lookup(index, EntityKind::SalesManager, sale.manager_id)? else {
        return Ok(None);
    };

    let (traffic_source_key, campaign_code) = match referrals.get(&enrollment.user_id) {
        Some(referral) => match lookup(index, EntityKind::TrafficSource, referral.source_id)? {
            Some(key) => (key, referral.campaign_code.clone()),
            None => (UNKNOWN_TRAFFIC_SOURCE_KEY, None),
        },
        None => (UNKNOWN_TRAFFIC_SOURCE_KEY, None),
    };

    Ok(Some(FactRow {
        sale_key,
        sale_id: sale.sale_id,
        user_key,
        course_key,
        sales_manager_key,
        traffic_source_key,
        campaign_code,
        date_key: calendar::date_key(sale.sale_date.date()),
        total_in_rubbles: sale.cost_in_rubbles,
    }))
}

/// Delete-and-rebuild every fact row from the active sales
fn rebuild_facts(tx: &Transaction<'_>) -> Result<(usize, usize)> {
    let index = active_key_index(tx)?;
    let enrollments: HashMap<i64, EnrollmentRecord> = EnrollmentRecord::load_active(tx)?
        .into_iter()
        .map(|s| (s.record.enrollment_id, s.record))
        .collect();
    let referrals = latest_referrals(UserTrafficRecord::load_active(tx)?.into_iter().map(|s| {
        Referral {
            surrogate_key: s.surrogate_key,
            user_id: s.record.user_id,
            source_id: s.record.source_id,
            referred_at: s.record.referred_at,
            campaign_code: s.record.campaign_code,
        }
    }));
    let calendar = calendar_keys(tx)?;

    let mut stmt = tx
        .prepare(
            "INSERT INTO fact_sales (sale_key, sale_id, user_key, course_key, sales_manager_key,
                traffic_source_key, campaign_code, date_key, total_in_rubbles, enrollment_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
        )
        .map_err(from_rusqlite)?;

    let mut facts = 0;
    let mut skipped = 0;
    for snapshot in SaleRecord::load_active(tx)? {
        let sale = &snapshot.record;
        let Some(fact) = build_fact(snapshot.surrogate_key, sale, &enrollments, &index, &referrals)?
        else {
            tracing::warn!(
                component = module_path!(),
                op = "rebuild",
                sale_id = sale.sale_id,
                enrollment_id = sale.enrollment_id,
                manager_id = sale.manager_id,
                "skipping sale with unresolved key chain"
            );
            skipped += 1;
            continue;
        };
        if !calendar.contains(&fact.date_key) {
            return Err(WarehouseError::CalendarGap {
                date: sale.sale_date.date(),
            }
            .into());
        }
        stmt.execute(params![
            fact.sale_key,
            fact.sale_id,
            fact.user_key,
            fact.course_key,
            fact.sales_manager_key,
            fact.traffic_source_key,
            fact.campaign_code,
            fact.date_key,
            fact.total_in_rubbles
        ])
        .map_err(from_rusqlite)?;
        facts += 1;
    }

    Ok((facts, skipped))
}
