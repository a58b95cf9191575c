//! At most one open version per business key, whatever the sequence of
//! opens and closes

use chrono::NaiveDate;
use proptest::prelude::*;
use rusqlite::Connection;
use std::collections::BTreeSet;
use wareflow_core::clock::FixedClock;
use wareflow_core::errors::ExErrorKind;
use wareflow_core::model::{SourceFeed, TrafficSourceRecord};
use wareflow_store::versioned::{close_version, open_new_version};
use wareflow_store::{db, migrations};

#[derive(Debug, Clone)]
enum Op {
    Open(i64),
    Close(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(1i64..4).prop_map(Op::Open), (1i64..4).prop_map(Op::Close)]
}

fn source(id: i64, step: usize) -> TrafficSourceRecord {
    TrafficSourceRecord {
        source_id: id,
        name: format!("source {step}"),
        channel: "organic".to_string(),
        details: None,
    }
}

fn open_keys(conn: &Connection) -> Vec<(i64, i64)> {
    conn.prepare(
        "SELECT source_id, COUNT(*) FROM wh_traffic_sources
         WHERE end_date = '9999-12-31' GROUP BY source_id ORDER BY source_id",
    )
    .unwrap()
    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

proptest! {
    #[test]
    fn prop_single_open_version(ops in prop::collection::vec(op(), 1..40)) {
        let mut conn = db::open_in_memory().unwrap();
        migrations::apply_migrations(&mut conn).unwrap();
        let mut model = BTreeSet::new();

        for (step, op) in ops.iter().enumerate() {
            let clock = FixedClock(
                NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::seconds(step as i64),
            );
            let batch_id = step as i64 + 1;
            match op {
                Op::Open(id) => {
                    let result = open_new_version(&conn, &source(*id, step), batch_id, SourceFeed::Oltp, &clock);
                    if model.insert(*id) {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert_eq!(result.unwrap_err().kind(), ExErrorKind::InvariantViolation);
                    }
                }
                Op::Close(id) => {
                    let result = close_version::<TrafficSourceRecord>(&conn, id, batch_id, &clock);
                    if model.remove(id) {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert_eq!(result.unwrap_err().kind(), ExErrorKind::NotFound);
                    }
                }
            }
        }

        let open = open_keys(&conn);
        prop_assert!(open.iter().all(|(_, n)| *n == 1));
        let keys: BTreeSet<i64> = open.into_iter().map(|(k, _)| k).collect();
        prop_assert_eq!(keys, model);
    }
}
