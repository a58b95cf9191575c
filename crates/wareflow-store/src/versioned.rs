//! SCD2 versioned store
//!
//! Every warehouse table keeps one row per version of a business key. Writes
//! only ever append a version or close the open one; nothing else changes
//! after insert.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use crate::ledger::{self, LedgerEntry, LoadMode};
use crate::source::status_column;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::time::Instant;
use wareflow_core::clock::Clock;
use wareflow_core::detect::{ChangeSet, Tracked};
use wareflow_core::errors::{ExError, ExErrorKind, WarehouseError};
use wareflow_core::model::{
    AuditColumns, CourseRecord, EnrollmentRecord, EntityKind, SaleRecord, SalesManagerRecord,
    Snapshot, SourceFeed, TrafficSourceRecord, UserRecord, UserTrafficKey, UserTrafficRecord,
    VersionEnd, OPEN_END_DATE,
};
use wareflow_core::resolve::KeyResolver;
use wareflow_core::{log_op_end, log_op_error, log_op_start};

/// Audit values for a version about to be opened
#[derive(Debug, Clone, Copy)]
pub struct NewVersion {
    pub start_date: NaiveDateTime,
    pub batch_id: i64,
    pub source: SourceFeed,
}

/// Which versions to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionScope {
    Active,
    All,
}

impl VersionScope {
    fn filter(&self, alias: &str) -> String {
        match self {
            VersionScope::Active => format!("WHERE {alias}.end_date = '{OPEN_END_DATE}'"),
            VersionScope::All => String::new(),
        }
    }
}

/// A record type persisted as an SCD2 table
pub trait Versioned: Tracked {
    /// Parent business keys to bind, in the order `insert_version` expects
    /// their surrogate keys
    fn parent_keys(&self) -> Vec<(EntityKind, i64)> {
        Vec::new()
    }

    /// Surrogate key of the open version, if any
    fn find_open(conn: &Connection, key: &Self::Key) -> Result<Option<i64>>;

    /// Append a version without any checks
    fn insert_version(
        conn: &Connection,
        record: &Self,
        parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64>;

    /// Versions ordered by business key then surrogate key. Child records
    /// carry the business keys of the parent versions they are bound to.
    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>>;

    fn load_active(conn: &Connection) -> Result<Vec<Snapshot<Self>>> {
        Self::load_versions(conn, VersionScope::Active)
    }
}

fn audit_select(alias: &str) -> String {
    format!(
        "{a}.start_date, {a}.end_date, {a}.insert_batch_id, {a}.update_batch_id, {a}.source_identifier",
        a = alias
    )
}

fn read_audit(row: &Row<'_>, first: usize) -> rusqlite::Result<AuditColumns> {
    let end_text: String = row.get(first + 1)?;
    let end_date = VersionEnd::parse(&end_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            first + 1,
            Type::Text,
            format!("unreadable end_date '{}'", end_text).into(),
        )
    })?;
    let source_id: i64 = row.get(first + 4)?;
    let source = SourceFeed::from_id(source_id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            first + 4,
            Type::Integer,
            format!("unknown source_identifier {}", source_id).into(),
        )
    })?;
    Ok(AuditColumns {
        start_date: row.get(first)?,
        end_date,
        insert_batch_id: row.get(first + 2)?,
        update_batch_id: row.get(first + 3)?,
        source,
    })
}

fn query_snapshots<R, F>(conn: &Connection, sql: &str, map: F) -> Result<Vec<Snapshot<R>>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<Snapshot<R>>,
{
    let mut stmt = conn.prepare(sql).map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], map)
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

fn find_open_by_id(conn: &Connection, kind: EntityKind, key: i64) -> Result<Option<i64>> {
    let (table, sk, bk) = single_key_columns(kind)?;
    conn.query_row(
        &format!("SELECT {sk} FROM {table} WHERE {bk} = ?1 AND end_date = '{OPEN_END_DATE}'"),
        [key],
        |row| row.get(0),
    )
    .optional()
    .map_err(from_rusqlite)
}

/// (table, surrogate key column, business key column) of an entity keyed by
/// a single id
fn single_key_columns(kind: EntityKind) -> Result<(&'static str, &'static str, &'static str)> {
    let bk = match kind {
        EntityKind::User => "user_id",
        EntityKind::SalesManager => "manager_id",
        EntityKind::TrafficSource => "source_id",
        EntityKind::Course => "course_id",
        EntityKind::Enrollment => "enrollment_id",
        EntityKind::Sale => "sale_id",
        EntityKind::UserTraffic => {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("resolve")
                .with_entity(kind)
                .with_message("user traffic has a composite business key"))
        }
    };
    Ok((kind.warehouse_table(), kind.surrogate_key_column(), bk))
}

fn insert_returning_sk(conn: &Connection, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<i64> {
    conn.execute(sql, values).map_err(from_rusqlite)?;
    Ok(conn.last_insert_rowid())
}

impl Versioned for UserRecord {
    fn find_open(conn: &Connection, key: &i64) -> Result<Option<i64>> {
        find_open_by_id(conn, EntityKind::User, *key)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        _parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        insert_returning_sk(
            conn,
            "INSERT INTO wh_users (user_id, first_name, last_name, email, phone, country,
                registered_at, start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.user_id,
                record.first_name,
                record.last_name,
                record.email,
                record.phone,
                record.country,
                record.registered_at,
                version.start_date,
                version.batch_id,
                version.source.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.user_sk, w.user_id, w.first_name, w.last_name, w.email, w.phone,
                    w.country, w.registered_at, {}
             FROM wh_users w {} ORDER BY w.user_id, w.user_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: UserRecord {
                    user_id: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    email: row.get(4)?,
                    phone: row.get(5)?,
                    country: row.get(6)?,
                    registered_at: row.get(7)?,
                },
                audit: read_audit(row, 8)?,
            })
        })
    }
}

impl Versioned for SalesManagerRecord {
    fn find_open(conn: &Connection, key: &i64) -> Result<Option<i64>> {
        find_open_by_id(conn, EntityKind::SalesManager, *key)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        _parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        insert_returning_sk(
            conn,
            "INSERT INTO wh_sales_managers (manager_id, first_name, last_name, email, hired_at,
                start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.manager_id,
                record.first_name,
                record.last_name,
                record.email,
                record.hired_at,
                version.start_date,
                version.batch_id,
                version.source.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.sales_manager_sk, w.manager_id, w.first_name, w.last_name, w.email,
                    w.hired_at, {}
             FROM wh_sales_managers w {} ORDER BY w.manager_id, w.sales_manager_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: SalesManagerRecord {
                    manager_id: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    email: row.get(4)?,
                    hired_at: row.get(5)?,
                },
                audit: read_audit(row, 6)?,
            })
        })
    }
}

impl Versioned for TrafficSourceRecord {
    fn find_open(conn: &Connection, key: &i64) -> Result<Option<i64>> {
        find_open_by_id(conn, EntityKind::TrafficSource, *key)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        _parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        insert_returning_sk(
            conn,
            "INSERT INTO wh_traffic_sources (source_id, name, channel, details,
                start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.source_id,
                record.name,
                record.channel,
                record.details,
                version.start_date,
                version.batch_id,
                version.source.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.traffic_source_sk, w.source_id, w.name, w.channel, w.details, {}
             FROM wh_traffic_sources w {} ORDER BY w.source_id, w.traffic_source_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: TrafficSourceRecord {
                    source_id: row.get(1)?,
                    name: row.get(2)?,
                    channel: row.get(3)?,
                    details: row.get(4)?,
                },
                audit: read_audit(row, 5)?,
            })
        })
    }
}

impl Versioned for CourseRecord {
    fn find_open(conn: &Connection, key: &i64) -> Result<Option<i64>> {
        find_open_by_id(conn, EntityKind::Course, *key)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        _parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        insert_returning_sk(
            conn,
            "INSERT INTO wh_courses (course_id, title, subject, description, price_in_rubbles,
                created_at, category, sub_category, start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.course_id,
                record.title,
                record.subject,
                record.description,
                record.price_in_rubbles,
                record.created_at,
                record.category,
                record.sub_category,
                version.start_date,
                version.batch_id,
                version.source.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.course_sk, w.course_id, w.title, w.subject, w.description,
                    w.price_in_rubbles, w.created_at, w.category, w.sub_category, {}
             FROM wh_courses w {} ORDER BY w.course_id, w.course_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: CourseRecord {
                    course_id: row.get(1)?,
                    title: row.get(2)?,
                    subject: row.get(3)?,
                    description: row.get(4)?,
                    price_in_rubbles: row.get(5)?,
                    created_at: row.get(6)?,
                    category: row.get(7)?,
                    sub_category: row.get(8)?,
                },
                audit: read_audit(row, 9)?,
            })
        })
    }
}

impl Versioned for EnrollmentRecord {
    fn parent_keys(&self) -> Vec<(EntityKind, i64)> {
        vec![
            (EntityKind::User, self.user_id),
            (EntityKind::Course, self.course_id),
        ]
    }

    fn find_open(conn: &Connection, key: &i64) -> Result<Option<i64>> {
        find_open_by_id(conn, EntityKind::Enrollment, *key)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        let [user_sk, course_sk] = bound_parents::<2>(EntityKind::Enrollment, parents)?;
        insert_returning_sk(
            conn,
            "INSERT INTO wh_enrollments (enrollment_id, user_sk, course_sk, enrolled_at, status,
                start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.enrollment_id,
                user_sk,
                course_sk,
                record.enrolled_at,
                record.status.as_str(),
                version.start_date,
                version.batch_id,
                version.source.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.enrollment_sk, w.enrollment_id, u.user_id, c.course_id, w.enrolled_at,
                    w.status, {}
             FROM wh_enrollments w
             JOIN wh_users u ON u.user_sk = w.user_sk
             JOIN wh_courses c ON c.course_sk = w.course_sk
             {} ORDER BY w.enrollment_id, w.enrollment_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: EnrollmentRecord {
                    enrollment_id: row.get(1)?,
                    user_id: row.get(2)?,
                    course_id: row.get(3)?,
                    enrolled_at: row.get(4)?,
                    status: status_column(row, 5)?,
                },
                audit: read_audit(row, 6)?,
            })
        })
    }
}

impl Versioned for SaleRecord {
    fn parent_keys(&self) -> Vec<(EntityKind, i64)> {
        vec![
            (EntityKind::Enrollment, self.enrollment_id),
            (EntityKind::SalesManager, self.manager_id),
        ]
    }

    fn find_open(conn: &Connection, key: &i64) -> Result<Option<i64>> {
        find_open_by_id(conn, EntityKind::Sale, *key)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        let [enrollment_sk, sales_manager_sk] = bound_parents::<2>(EntityKind::Sale, parents)?;
        insert_returning_sk(
            conn,
            "INSERT INTO wh_sales (sale_id, enrollment_sk, sales_manager_sk, sale_date,
                cost_in_rubbles, start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.sale_id,
                enrollment_sk,
                sales_manager_sk,
                record.sale_date,
                record.cost_in_rubbles,
                version.start_date,
                version.batch_id,
                version.source.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.sale_sk, w.sale_id, e.enrollment_id, m.manager_id, w.sale_date,
                    w.cost_in_rubbles, {}
             FROM wh_sales w
             JOIN wh_enrollments e ON e.enrollment_sk = w.enrollment_sk
             JOIN wh_sales_managers m ON m.sales_manager_sk = w.sales_manager_sk
             {} ORDER BY w.sale_id, w.sale_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: SaleRecord {
                    sale_id: row.get(1)?,
                    enrollment_id: row.get(2)?,
                    manager_id: row.get(3)?,
                    sale_date: row.get(4)?,
                    cost_in_rubbles: row.get(5)?,
                },
                audit: read_audit(row, 6)?,
            })
        })
    }
}

impl Versioned for UserTrafficRecord {
    fn parent_keys(&self) -> Vec<(EntityKind, i64)> {
        vec![
            (EntityKind::User, self.user_id),
            (EntityKind::TrafficSource, self.source_id),
        ]
    }

    fn find_open(conn: &Connection, key: &UserTrafficKey) -> Result<Option<i64>> {
        conn.query_row(
            &format!(
                "SELECT user_traffic_sk FROM wh_user_traffic
                 WHERE user_id = ?1 AND source_id = ?2 AND referred_at = ?3
                   AND source_identifier = ?4 AND end_date = '{OPEN_END_DATE}'"
            ),
            params![key.user_id, key.source_id, key.referred_at, key.feed.id()],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)
    }

    fn insert_version(
        conn: &Connection,
        record: &Self,
        parents: &[i64],
        version: &NewVersion,
    ) -> Result<i64> {
        let [user_sk, traffic_source_sk] = bound_parents::<2>(EntityKind::UserTraffic, parents)?;
        insert_returning_sk(
            conn,
            "INSERT INTO wh_user_traffic (user_id, source_id, referred_at, user_sk,
                traffic_source_sk, campaign_code, start_date, insert_batch_id, source_identifier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.user_id,
                record.source_id,
                record.referred_at,
                user_sk,
                traffic_source_sk,
                record.campaign_code,
                version.start_date,
                version.batch_id,
                record.feed.id(),
            ],
        )
    }

    fn load_versions(conn: &Connection, scope: VersionScope) -> Result<Vec<Snapshot<Self>>> {
        let sql = format!(
            "SELECT w.user_traffic_sk, w.user_id, w.source_id, w.referred_at, w.campaign_code, {}
             FROM wh_user_traffic w {}
             ORDER BY w.user_id, w.source_id, w.referred_at, w.source_identifier,
                      w.user_traffic_sk",
            audit_select("w"),
            scope.filter("w")
        );
        query_snapshots(conn, &sql, |row| {
            let audit = read_audit(row, 5)?;
            Ok(Snapshot {
                surrogate_key: row.get(0)?,
                record: UserTrafficRecord {
                    user_id: row.get(1)?,
                    source_id: row.get(2)?,
                    referred_at: row.get(3)?,
                    campaign_code: row.get(4)?,
                    feed: audit.source,
                },
                audit,
            })
        })
    }
}

fn bound_parents<const N: usize>(kind: EntityKind, parents: &[i64]) -> Result<[i64; N]> {
    <[i64; N]>::try_from(parents).map_err(|_| {
        ExError::new(ExErrorKind::Internal)
            .with_op("insert_version")
            .with_entity(kind)
            .with_message(format!("expected {} parent keys, got {}", N, parents.len()))
    })
}

// ========== Surrogate key resolution ==========

/// Resolves against whatever connection or transaction it wraps, so it sees
/// versions written earlier in the same transaction
pub struct SqliteKeyResolver<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteKeyResolver<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl KeyResolver for SqliteKeyResolver<'_> {
    fn resolve(&self, kind: EntityKind, business_key: i64) -> wareflow_core::Result<i64> {
        find_open_by_id(self.conn, kind, business_key)?.ok_or_else(|| {
            WarehouseError::UnresolvedReference {
                entity: kind,
                business_key: business_key.to_string(),
            }
            .into()
        })
    }
}

fn resolve_parents<R: Versioned>(resolver: &dyn KeyResolver, record: &R) -> Result<Vec<i64>> {
    record
        .parent_keys()
        .into_iter()
        .map(|(kind, key)| resolver.resolve(kind, key))
        .collect()
}

// ========== Version transitions ==========

/// Append an open version for a key that has none
///
/// Parent references are resolved on `conn`.
///
/// # Errors
///
/// - `InvariantViolation` if the key already has an open version
/// - `UnresolvedReference` if a parent has no open version
pub fn open_new_version<R: Versioned>(
    conn: &Connection,
    record: &R,
    batch_id: i64,
    source: SourceFeed,
    clock: &dyn Clock,
) -> Result<i64> {
    let parents = resolve_parents(&SqliteKeyResolver::new(conn), record)?;
    open_resolved(
        conn,
        record,
        &parents,
        &NewVersion {
            start_date: clock.now(),
            batch_id,
            source,
        },
    )
}

fn open_resolved<R: Versioned>(
    conn: &Connection,
    record: &R,
    parents: &[i64],
    version: &NewVersion,
) -> Result<i64> {
    let key = record.business_key();
    if R::find_open(conn, &key)?.is_some() {
        return Err(WarehouseError::OpenVersionExists {
            entity: R::KIND,
            business_key: key.to_string(),
        }
        .into());
    }
    R::insert_version(conn, record, parents, version)
}

/// Close the open version of a key, returning its surrogate key
///
/// # Errors
///
/// `NotFound` if the key has no open version.
pub fn close_version<R: Versioned>(
    conn: &Connection,
    key: &R::Key,
    batch_id: i64,
    clock: &dyn Clock,
) -> Result<i64> {
    let sk = R::find_open(conn, key)?.ok_or_else(|| -> ExError {
        WarehouseError::NoOpenVersion {
            entity: R::KIND,
            business_key: key.to_string(),
        }
        .into()
    })?;
    close_by_sk(conn, R::KIND, sk, batch_id, clock.now())?;
    Ok(sk)
}

fn close_by_sk(
    conn: &Connection,
    kind: EntityKind,
    sk: i64,
    batch_id: i64,
    closed_at: NaiveDateTime,
) -> Result<()> {
    let updated = conn
        .execute(
            &format!(
                "UPDATE {table} SET end_date = ?1, update_batch_id = ?2
                 WHERE {sk_col} = ?3 AND end_date = '{OPEN_END_DATE}'",
                table = kind.warehouse_table(),
                sk_col = kind.surrogate_key_column(),
            ),
            params![VersionEnd::Closed(closed_at).to_column(), batch_id, sk],
        )
        .map_err(from_rusqlite)?;
    if updated != 1 {
        return Err(WarehouseError::NoOpenVersion {
            entity: kind,
            business_key: format!("surrogate key {}", sk),
        }
        .into());
    }
    Ok(())
}

// ========== Entity steps ==========

/// Batch, feed and mode of one entity step
pub struct StepContext<'a> {
    pub batch_id: i64,
    pub source: SourceFeed,
    pub mode: LoadMode,
    pub clock: &'a dyn Clock,
}

/// Row counts of one entity step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Rows skipped because a parent had no open version
    pub skipped: usize,
}

/// Apply a change set in one transaction and record the step in the ledger
///
/// Changed keys are closed before their new version is opened. Rows whose
/// parents cannot be resolved are skipped and counted; a skipped Changed
/// row keeps its current version open.
pub fn apply_changes<R: Versioned>(
    conn: &mut Connection,
    change_set: &ChangeSet<R>,
    ctx: &StepContext<'_>,
) -> Result<StepCounts> {
    let start = Instant::now();
    log_op_start!(
        "apply_changes",
        entity = R::KIND.name(),
        batch_id = ctx.batch_id,
        source_identifier = ctx.source.id()
    );

    let result = apply_in_transaction(conn, change_set, ctx);
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(counts) => {
            log_op_end!(
                "apply_changes",
                duration_ms = duration_ms,
                entity = R::KIND.name(),
                batch_id = ctx.batch_id,
                new_count = counts.new,
                changed_count = counts.changed,
                unchanged_count = counts.unchanged,
                skipped_count = counts.skipped
            );
        }
        Err(err) => {
            log_op_error!(
                "apply_changes",
                err.clone(),
                duration_ms = duration_ms,
                entity = R::KIND.name(),
                batch_id = ctx.batch_id
            );
        }
    }

    result.map_err(|e| e.with_batch_id(ctx.batch_id))
}

/// Load every row as a new version (full load)
pub fn bulk_load<R: Versioned>(
    conn: &mut Connection,
    rows: Vec<R>,
    ctx: &StepContext<'_>,
) -> Result<StepCounts> {
    apply_changes(conn, &ChangeSet::all_new(rows), ctx)
}

fn apply_in_transaction<R: Versioned>(
    conn: &mut Connection,
    change_set: &ChangeSet<R>,
    ctx: &StepContext<'_>,
) -> Result<StepCounts> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    let now = ctx.clock.now();
    let version = NewVersion {
        start_date: now,
        batch_id: ctx.batch_id,
        source: ctx.source,
    };
    let mut counts = StepCounts {
        unchanged: change_set.unchanged,
        ..StepCounts::default()
    };

    {
        let resolver = SqliteKeyResolver::new(&tx);

        for changed in &change_set.changed {
            let Some(parents) = resolve_or_skip(&resolver, &changed.record)? else {
                counts.skipped += 1;
                continue;
            };
            close_by_sk(&tx, R::KIND, changed.previous_sk, ctx.batch_id, now)?;
            R::insert_version(&tx, &changed.record, &parents, &version)?;
            counts.changed += 1;
        }

        for record in &change_set.new {
            let Some(parents) = resolve_or_skip(&resolver, record)? else {
                counts.skipped += 1;
                continue;
            };
            open_resolved(&tx, record, &parents, &version)?;
            counts.new += 1;
        }
    }

    ledger::record_step(
        &tx,
        &LedgerEntry {
            batch_id: ctx.batch_id,
            entity: R::KIND,
            source: ctx.source,
            mode: ctx.mode,
            counts,
            applied_at: now,
        },
    )?;

    tx.commit().map_err(from_rusqlite)?;
    Ok(counts)
}

fn resolve_or_skip<R: Versioned>(
    resolver: &dyn KeyResolver,
    record: &R,
) -> Result<Option<Vec<i64>>> {
    match resolve_parents(resolver, record) {
        Ok(parents) => Ok(Some(parents)),
        Err(err) if err.kind() == ExErrorKind::UnresolvedReference => {
            tracing::warn!(
                component = module_path!(),
                op = "apply_changes",
                entity = R::KIND.name(),
                business_key = %record.business_key(),
                parent = err.entity().unwrap_or_default(),
                parent_key = err.business_key().unwrap_or_default(),
                "skipping row with unresolved parent"
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrations};
    use chrono::NaiveDate;
    use wareflow_core::clock::FixedClock;
    use wareflow_core::detect::detect;
    use wareflow_core::model::EnrollmentStatus;

    fn setup() -> Connection {
        let mut conn = db::open_in_memory().unwrap();
        migrations::apply_migrations(&mut conn).unwrap();
        conn
    }

    fn clock(day: u32) -> FixedClock {
        FixedClock(
            NaiveDate::from_ymd_opt(2025, 2, day)
                .unwrap()
                .and_hms_opt(1, 0, 0)
                .unwrap(),
        )
    }

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn user(id: i64, first_name: &str) -> UserRecord {
        UserRecord {
            user_id: id,
            first_name: first_name.to_string(),
            last_name: "Smith".to_string(),
            email: format!("u{id}@example.com"),
            phone: None,
            country: Some("RU".to_string()),
            registered_at: ts(1),
        }
    }

    fn course(id: i64) -> CourseRecord {
        CourseRecord {
            course_id: id,
            title: "Rust".to_string(),
            subject: "CS".to_string(),
            description: None,
            price_in_rubbles: 1000,
            created_at: ts(1),
            category: "Programming".to_string(),
            sub_category: "Systems".to_string(),
        }
    }

    fn ctx(batch_id: i64, clock: &FixedClock) -> StepContext<'_> {
        StepContext {
            batch_id,
            source: SourceFeed::Oltp,
            mode: if batch_id == 1 {
                LoadMode::Full
            } else {
                LoadMode::Incremental
            },
            clock,
        }
    }

    #[test]
    fn test_open_then_close_round_trip() {
        let conn = setup();
        let c = clock(1);

        let sk = open_new_version(&conn, &user(1, "Alice"), 1, SourceFeed::Oltp, &c).unwrap();
        let active = UserRecord::load_active(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].surrogate_key, sk);
        assert_eq!(active[0].audit.insert_batch_id, 1);
        assert_eq!(active[0].audit.update_batch_id, None);
        assert_eq!(active[0].audit.start_date, c.now());

        let closed = close_version::<UserRecord>(&conn, &1, 2, &clock(2)).unwrap();
        assert_eq!(closed, sk);
        assert!(UserRecord::load_active(&conn).unwrap().is_empty());

        let history = UserRecord::load_versions(&conn, VersionScope::All).unwrap();
        assert_eq!(history[0].audit.update_batch_id, Some(2));
        assert_eq!(history[0].audit.end_date, VersionEnd::Closed(clock(2).now()));
    }

    #[test]
    fn test_second_open_version_is_rejected() {
        let conn = setup();
        open_new_version(&conn, &user(1, "Alice"), 1, SourceFeed::Oltp, &clock(1)).unwrap();
        let err =
            open_new_version(&conn, &user(1, "Alicia"), 2, SourceFeed::Oltp, &clock(2)).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvariantViolation);
    }

    #[test]
    fn test_closing_without_open_version_is_not_found() {
        let conn = setup();
        let err = close_version::<UserRecord>(&conn, &42, 2, &clock(2)).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
    }

    #[test]
    fn test_apply_changes_closes_then_opens() {
        let mut conn = setup();
        let c1 = clock(1);
        bulk_load(&mut conn, vec![user(1, "Alice"), user(2, "Bob")], &ctx(1, &c1)).unwrap();

        let active = UserRecord::load_active(&conn).unwrap();
        let change_set = detect(&[user(1, "Alicia"), user(2, "Bob")], &active).unwrap();
        let c2 = clock(2);
        let counts = apply_changes(&mut conn, &change_set, &ctx(2, &c2)).unwrap();

        assert_eq!(
            counts,
            StepCounts {
                new: 0,
                changed: 1,
                unchanged: 1,
                skipped: 0
            }
        );
        let history: Vec<_> = UserRecord::load_versions(&conn, VersionScope::All)
            .unwrap()
            .into_iter()
            .filter(|s| s.record.user_id == 1)
            .collect();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].record.first_name, "Alice");
        assert_eq!(history[0].audit.update_batch_id, Some(2));
        assert!(!history[0].is_active());
        assert_eq!(history[1].record.first_name, "Alicia");
        assert_eq!(history[1].audit.insert_batch_id, 2);
        assert!(history[1].is_active());
    }

    #[test]
    fn test_child_reads_back_parent_business_keys() {
        let mut conn = setup();
        let c = clock(1);
        bulk_load(&mut conn, vec![user(1, "Alice")], &ctx(1, &c)).unwrap();
        bulk_load(&mut conn, vec![course(2)], &ctx(1, &c)).unwrap();
        let enrollment = EnrollmentRecord {
            enrollment_id: 10,
            user_id: 1,
            course_id: 2,
            enrolled_at: ts(3),
            status: EnrollmentStatus::Active,
        };
        bulk_load(&mut conn, vec![enrollment.clone()], &ctx(1, &c)).unwrap();

        // A new user version does not touch the enrollment's binding
        let active_users = UserRecord::load_active(&conn).unwrap();
        let renamed = detect(&[user(1, "Alicia")], &active_users).unwrap();
        let c2 = clock(2);
        apply_changes(&mut conn, &renamed, &ctx(2, &c2)).unwrap();

        let active = EnrollmentRecord::load_active(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].record, enrollment);
        assert_eq!(detect(&[enrollment], &active).unwrap().unchanged, 1);
    }

    #[test]
    fn test_unresolved_parent_is_skipped_and_counted() {
        let mut conn = setup();
        let c = clock(1);
        bulk_load(&mut conn, vec![user(1, "Alice")], &ctx(1, &c)).unwrap();
        let orphan = EnrollmentRecord {
            enrollment_id: 11,
            user_id: 1,
            course_id: 99,
            enrolled_at: ts(3),
            status: EnrollmentStatus::Active,
        };

        let counts = bulk_load(&mut conn, vec![orphan], &ctx(1, &c)).unwrap();

        assert_eq!(counts.new, 0);
        assert_eq!(counts.skipped, 1);
        assert!(EnrollmentRecord::load_active(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_resolver_sees_uncommitted_versions_in_transaction() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let sk = open_new_version(&tx, &user(5, "Eve"), 1, SourceFeed::Oltp, &clock(1)).unwrap();
        let resolver = SqliteKeyResolver::new(&tx);
        assert_eq!(resolver.resolve(EntityKind::User, 5).unwrap(), sk);
        assert_eq!(
            resolver.resolve(EntityKind::User, 6).unwrap_err().kind(),
            ExErrorKind::UnresolvedReference
        );
        assert_eq!(
            resolver
                .resolve(EntityKind::UserTraffic, 5)
                .unwrap_err()
                .kind(),
            ExErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_user_traffic_feeds_version_independently() {
        let mut conn = setup();
        let c = clock(1);
        bulk_load(&mut conn, vec![user(1, "Alice")], &ctx(1, &c)).unwrap();
        bulk_load(
            &mut conn,
            vec![TrafficSourceRecord {
                source_id: 3,
                name: "Search".to_string(),
                channel: "organic".to_string(),
                details: None,
            }],
            &ctx(1, &c),
        )
        .unwrap();
        let oltp = UserTrafficRecord {
            user_id: 1,
            source_id: 3,
            referred_at: ts(4),
            campaign_code: Some("spring".to_string()),
            feed: SourceFeed::Oltp,
        };
        let csv = UserTrafficRecord {
            feed: SourceFeed::Csv,
            campaign_code: None,
            ..oltp.clone()
        };

        open_new_version(&conn, &oltp, 1, SourceFeed::Oltp, &c).unwrap();
        open_new_version(&conn, &csv, 1, SourceFeed::Csv, &c).unwrap();

        let active = UserTrafficRecord::load_active(&conn).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].record, oltp);
        assert_eq!(active[1].record, csv);
        assert_eq!(active[1].audit.source, SourceFeed::Csv);
    }
}
