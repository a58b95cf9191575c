//! End-to-end load scenarios over an in-memory database

use chrono::NaiveDate;
use rusqlite::Connection;
use std::io::Write;
use std::path::Path;
use wareflow_core::clock::FixedClock;
use wareflow_core::logging_facility::init_test_capture;
use wareflow_core::errors::ExErrorKind;
use wareflow_core::model::{EntityKind, SourceFeed};
use wareflow_engine::commands::load::{run_full, run_incremental, LoadOptions};
use wareflow_engine::{apply_load_command, LoadCommand};
use wareflow_store::seed::{import_seed_document, parse_seed_str};
use wareflow_store::{db, migrations};

const SEED: &str = r#"
users:
  - { user_id: 1, first_name: Alice, last_name: Smith, email: alice@example.com, country: RU, registered_at: "2025-01-01 10:00:00" }
  - { user_id: 2, first_name: Bob, last_name: Stone, email: bob@example.com, registered_at: "2025-01-03 12:00:00" }
sales_managers:
  - { manager_id: 7, first_name: Ivan, last_name: Petrov, email: ivan@example.com, hired_at: "2024-12-01 09:00:00" }
categories:
  - { category_id: 1, name: Programming }
subcategories:
  - { subcategory_id: 1, name: Systems }
courses:
  - { course_id: 2, title: Rust, subject: CS, price_in_rubbles: 4900, created_at: "2024-12-15 08:00:00", category_id: 1, subcategory_id: 1 }
  - { course_id: 3, title: Go, subject: CS, price_in_rubbles: 3900, created_at: "2024-12-20 08:00:00", category_id: 1, subcategory_id: 1 }
  - { course_id: 4, title: Zig, subject: CS, price_in_rubbles: 2900, created_at: "2024-12-21 08:00:00", category_id: 1, subcategory_id: 1 }
traffic_sources:
  - { source_id: 1, name: Search, channel: organic }
  - { source_id: 2, name: Ads, channel: paid }
enrollments:
  - { enrollment_id: 10, user_id: 1, course_id: 2, enrolled_at: "2025-01-04 10:00:00", status: active }
  - { enrollment_id: 11, user_id: 2, course_id: 3, enrolled_at: "2025-01-05 10:00:00", status: active }
sales:
  - { sale_id: 500, enrollment_id: 10, manager_id: 7, sale_date: "2025-01-06 15:00:00", cost_in_rubbles: 4900 }
  - { sale_id: 501, enrollment_id: 11, manager_id: 7, sale_date: "2025-01-07 15:00:00", cost_in_rubbles: 3900 }
user_traffic:
  - { user_id: 1, source_id: 1, referred_at: "2025-01-01 09:00:00", campaign_code: A }
  - { user_id: 1, source_id: 2, referred_at: "2025-01-05 09:00:00", campaign_code: B }
"#;

fn clock(day: u32) -> FixedClock {
    FixedClock(
        NaiveDate::from_ymd_opt(2025, 1, day)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap(),
    )
}

fn options(clock: &FixedClock) -> LoadOptions<'_> {
    LoadOptions {
        user_traffic_csv: None,
        clock,
    }
}

fn seeded(seed: &str) -> Connection {
    let mut conn = db::open_in_memory().unwrap();
    migrations::apply_migrations(&mut conn).unwrap();
    import_seed_document(&parse_seed_str(seed).unwrap(), &mut conn).unwrap();
    conn
}

fn reseed(conn: &mut Connection, seed: &str) {
    import_seed_document(&parse_seed_str(seed).unwrap(), conn).unwrap();
}

fn scalar(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn active_sk(conn: &Connection, kind: EntityKind, key_column: &str, key: i64) -> i64 {
    scalar(
        conn,
        &format!(
            "SELECT {} FROM {} WHERE {} = {} AND end_date = '9999-12-31'",
            kind.surrogate_key_column(),
            kind.warehouse_table(),
            key_column,
            key
        ),
    )
}

fn dump(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {table} ORDER BY 1"))
        .unwrap();
    let columns = stmt.column_count();
    stmt.query_map([], |row| {
        (0..columns)
            .map(|i| row.get_ref(i).map(|v| format!("{:?}", v)))
            .collect::<Result<Vec<_>, _>>()
            .map(|cells| cells.join("|"))
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

#[test]
fn test_full_load_builds_facts_from_active_keys() {
    let mut conn = seeded(SEED);
    let c = clock(8);

    let report = run_full(&mut conn, &options(&c)).unwrap();
    assert_eq!(report.rebuild.facts, 2);
    assert_eq!(report.rebuild.skipped_sales, 0);

    let (user_key, course_key, manager_key, traffic_key, campaign, date_key, total): (
        i64,
        i64,
        i64,
        i64,
        Option<String>,
        i64,
        i64,
    ) = conn
        .query_row(
            "SELECT user_key, course_key, sales_manager_key, traffic_source_key, campaign_code,
                    date_key, total_in_rubbles
             FROM fact_sales WHERE sale_id = 500",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .unwrap();

    assert_eq!(user_key, active_sk(&conn, EntityKind::User, "user_id", 1));
    assert_eq!(course_key, active_sk(&conn, EntityKind::Course, "course_id", 2));
    assert_eq!(
        manager_key,
        active_sk(&conn, EntityKind::SalesManager, "manager_id", 7)
    );
    // the later referral wins
    assert_eq!(
        traffic_key,
        active_sk(&conn, EntityKind::TrafficSource, "source_id", 2)
    );
    assert_eq!(campaign.as_deref(), Some("B"));
    assert_eq!(date_key, 20250106);
    assert_eq!(total, 4900);
}

#[test]
fn test_user_without_referral_maps_to_unknown_source() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    let traffic_key = scalar(
        &conn,
        "SELECT traffic_source_key FROM fact_sales WHERE sale_id = 501",
    );
    assert_eq!(traffic_key, -1);
}

#[test]
fn test_full_load_calendar_spans_event_dates() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    assert_eq!(scalar(&conn, "SELECT MIN(date_key) FROM dim_date"), 20241215);
    assert_eq!(scalar(&conn, "SELECT MAX(date_key) FROM dim_date"), 20250107);
    // 17 days of December plus 7 of January
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM dim_date"), 24);
}

#[test]
fn test_rename_creates_second_version() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();
    let old_sk = active_sk(&conn, EntityKind::User, "user_id", 1);

    reseed(&mut conn, &SEED.replace("first_name: Alice,", "first_name: Alicia,"));
    let c9 = clock(9);
    let report = run_incremental(&mut conn, 20250109, &options(&c9)).unwrap();

    let user_step = report
        .steps
        .iter()
        .find(|s| s.entity == EntityKind::User)
        .unwrap();
    assert_eq!(user_step.counts.changed, 1);
    assert_eq!(user_step.counts.unchanged, 1);

    assert_eq!(
        scalar(&conn, "SELECT COUNT(*) FROM wh_users WHERE user_id = 1"),
        2
    );
    let (end_date, update_batch): (String, i64) = conn
        .query_row(
            "SELECT end_date, update_batch_id FROM wh_users WHERE user_sk = ?1",
            [old_sk],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_ne!(end_date, "9999-12-31");
    assert_eq!(update_batch, 20250109);

    let new_sk = active_sk(&conn, EntityKind::User, "user_id", 1);
    assert_ne!(new_sk, old_sk);
    let (dim_key, dim_name): (i64, String) = conn
        .query_row(
            "SELECT user_key, first_name FROM dim_user WHERE user_id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!((dim_key, dim_name.as_str()), (new_sk, "Alicia"));
    assert_eq!(
        scalar(&conn, "SELECT user_key FROM fact_sales WHERE sale_id = 500"),
        new_sk
    );
}

#[test]
fn test_course_deleted_from_source_keeps_dimension_row() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    conn.execute("DELETE FROM source_courses WHERE course_id = 4", [])
        .unwrap();
    let c9 = clock(9);
    run_incremental(&mut conn, 20250109, &options(&c9)).unwrap();

    assert_eq!(
        scalar(&conn, "SELECT COUNT(*) FROM dim_course WHERE course_id = 4"),
        1
    );
    assert_eq!(
        scalar(
            &conn,
            "SELECT COUNT(*) FROM wh_courses WHERE course_id = 4 AND end_date = '9999-12-31'"
        ),
        1
    );
}

#[test]
fn test_retrying_an_applied_batch_changes_nothing() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();
    reseed(&mut conn, &SEED.replace("first_name: Alice,", "first_name: Alicia,"));

    let c9 = clock(9);
    run_incremental(&mut conn, 20250109, &options(&c9)).unwrap();
    let users_before = dump(&conn, "wh_users");
    let facts_before = dump(&conn, "fact_sales");

    let retry = apply_load_command(
        LoadCommand::Incremental { batch_id: 20250109 },
        &mut conn,
        &options(&c9),
    )
    .unwrap();

    assert!(retry.steps.iter().all(|s| s.replayed));
    assert_eq!(dump(&conn, "wh_users"), users_before);
    assert_eq!(dump(&conn, "fact_sales"), facts_before);
}

#[test]
fn test_unresolved_children_are_skipped_and_counted() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    // an enrollment for a user the source does not know
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         INSERT INTO source_enrollments VALUES (12, 99, 2, '2025-01-08 10:00:00', 'active');
         INSERT INTO source_sales VALUES (502, 12, 7, '2025-01-08 11:00:00', 100);
         PRAGMA foreign_keys = ON;",
    )
    .unwrap();

    let c9 = clock(9);
    let report = run_incremental(&mut conn, 20250109, &options(&c9)).unwrap();

    let skipped = |kind: EntityKind| {
        report
            .steps
            .iter()
            .find(|s| s.entity == kind)
            .map(|s| s.counts.skipped)
            .unwrap()
    };
    assert_eq!(skipped(EntityKind::Enrollment), 1);
    assert_eq!(skipped(EntityKind::Sale), 1);
    assert_eq!(
        scalar(&conn, "SELECT COUNT(*) FROM wh_enrollments WHERE enrollment_id = 12"),
        0
    );
    assert_eq!(report.rebuild.facts, 2);
}

#[test]
fn test_calendar_grows_with_incremental_sales() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    let extended = SEED
        .replace(
            "enrollments:\n",
            "enrollments:\n  - { enrollment_id: 12, user_id: 2, course_id: 2, enrolled_at: \"2025-01-10 10:00:00\", status: active }\n",
        )
        .replace(
            "sales:\n",
            "sales:\n  - { sale_id: 502, enrollment_id: 12, manager_id: 7, sale_date: \"2025-01-20 10:00:00\", cost_in_rubbles: 4900 }\n",
        );
    reseed(&mut conn, &extended);

    let c21 = clock(21);
    let report = run_incremental(&mut conn, 20250121, &options(&c21)).unwrap();

    assert_eq!(report.rebuild.facts, 3);
    assert_eq!(scalar(&conn, "SELECT MIN(date_key) FROM dim_date"), 20241215);
    assert_eq!(scalar(&conn, "SELECT MAX(date_key) FROM dim_date"), 20250120);
}

#[test]
fn test_batch_after_a_failed_batch_catches_up_calendar_and_dimensions() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    let changed = SEED
        .replace("first_name: Alice,", "first_name: Alicia,")
        .replace(
            "enrollments:\n",
            "enrollments:\n  - { enrollment_id: 12, user_id: 2, course_id: 2, enrolled_at: \"2025-01-10 10:00:00\", status: active }\n",
        )
        .replace(
            "sales:\n",
            "sales:\n  - { sale_id: 502, enrollment_id: 12, manager_id: 7, sale_date: \"2025-01-20 10:00:00\", cost_in_rubbles: 4900 }\n",
        );
    reseed(&mut conn, &changed);

    // the OLTP steps commit, then the CSV step fails before the rebuild
    let c21 = clock(21);
    let broken = LoadOptions {
        user_traffic_csv: Some(Path::new("/nonexistent/traffic.csv")),
        clock: &c21,
    };
    let err = run_incremental(&mut conn, 20250121, &broken).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::Io);
    assert_eq!(
        scalar(&conn, "SELECT COUNT(*) FROM wh_sales WHERE sale_id = 502"),
        1
    );
    assert_eq!(scalar(&conn, "SELECT MAX(date_key) FROM dim_date"), 20250107);

    let c22 = clock(22);
    let report = run_incremental(&mut conn, 20250122, &options(&c22)).unwrap();

    assert_eq!(report.rebuild.facts, 3);
    assert_eq!(scalar(&conn, "SELECT MAX(date_key) FROM dim_date"), 20250120);
    let alicia = active_sk(&conn, EntityKind::User, "user_id", 1);
    assert_eq!(
        scalar(&conn, "SELECT user_key FROM dim_user WHERE user_id = 1"),
        alicia
    );
    assert_eq!(
        scalar(&conn, "SELECT user_key FROM fact_sales WHERE sale_id = 500"),
        alicia
    );

    // and the next scheduled batch keeps working
    let c23 = clock(23);
    assert!(run_incremental(&mut conn, 20250123, &options(&c23)).is_ok());
}

#[test]
fn test_enrollment_moved_to_another_course_repoints_facts() {
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();
    let rust_course = active_sk(&conn, EntityKind::Course, "course_id", 2);
    assert_eq!(
        scalar(&conn, "SELECT course_key FROM fact_sales WHERE sale_id = 500"),
        rust_course
    );

    reseed(
        &mut conn,
        &SEED.replace(
            "{ enrollment_id: 10, user_id: 1, course_id: 2,",
            "{ enrollment_id: 10, user_id: 1, course_id: 3,",
        ),
    );
    let c9 = clock(9);
    let report = run_incremental(&mut conn, 20250109, &options(&c9)).unwrap();

    let counts = |kind: EntityKind| {
        report
            .steps
            .iter()
            .find(|s| s.entity == kind)
            .map(|s| s.counts)
            .unwrap()
    };
    assert_eq!(counts(EntityKind::Enrollment).changed, 1);
    assert_eq!(counts(EntityKind::Sale).changed, 0);
    assert_eq!(
        scalar(&conn, "SELECT COUNT(*) FROM wh_enrollments WHERE enrollment_id = 10"),
        2
    );

    let go_course = active_sk(&conn, EntityKind::Course, "course_id", 3);
    assert_eq!(
        scalar(&conn, "SELECT course_key FROM fact_sales WHERE sale_id = 500"),
        go_course
    );
}

#[test]
fn test_csv_feed_versions_independently_of_oltp() {
    let mut conn = seeded(SEED);
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "user_id,source_id,referred_at,campaign_code").unwrap();
    // same referral as the OLTP row, different campaign
    writeln!(csv, "1,1,2025-01-01 09:00:00,csv-A").unwrap();

    let c = clock(8);
    let opts = LoadOptions {
        user_traffic_csv: Some(csv.path()),
        clock: &c,
    };
    let report = run_full(&mut conn, &opts).unwrap();

    let csv_step = report
        .steps
        .iter()
        .find(|s| s.source == SourceFeed::Csv)
        .unwrap();
    assert_eq!(csv_step.entity, EntityKind::UserTraffic);
    assert_eq!(csv_step.counts.new, 1);

    let open_per_feed: Vec<(i64, Option<String>)> = conn
        .prepare(
            "SELECT source_identifier, campaign_code FROM wh_user_traffic
             WHERE user_id = 1 AND source_id = 1 AND end_date = '9999-12-31'
             ORDER BY source_identifier",
        )
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        open_per_feed,
        vec![(1, Some("A".to_string())), (2, Some("csv-A".to_string()))]
    );
}

#[test]
fn test_incremental_run_logs_start_and_end_with_batch() {
    let capture = init_test_capture();
    let mut conn = seeded(SEED);
    let c = clock(8);
    run_full(&mut conn, &options(&c)).unwrap();

    let c31 = clock(31);
    run_incremental(&mut conn, 20250131, &options(&c31)).unwrap();

    let events: Vec<_> = capture
        .events_for_op("run_incremental")
        .into_iter()
        .filter(|e| e.field("batch_id") == Some("20250131"))
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event(), Some("start"));
    assert_eq!(events[1].event(), Some("end"));
    assert_eq!(events[1].field("new_count"), Some("0"));
    assert_eq!(events[0].field("run_id"), events[1].field("run_id"));
}
