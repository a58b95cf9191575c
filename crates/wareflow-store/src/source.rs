//! Reads the OLTP source tables into typed records

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use wareflow_core::detect::Tracked;
use wareflow_core::model::{
    CourseRecord, EnrollmentRecord, EnrollmentStatus, SaleRecord, SalesManagerRecord, SourceFeed,
    TrafficSourceRecord, UserRecord, UserTrafficRecord,
};

/// A record type with a table in the OLTP source
pub trait SourceEntity: Tracked {
    /// Every source row, ordered by business key
    fn read_source(conn: &Connection) -> Result<Vec<Self>>;
}

pub(crate) fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<EnrollmentStatus> {
    let text: String = row.get(idx)?;
    EnrollmentStatus::parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown enrollment status '{}'", text).into(),
        )
    })
}

fn query_all<T, F>(conn: &Connection, sql: &str, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], map)
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

impl SourceEntity for UserRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT user_id, first_name, last_name, email, phone, country, registered_at
             FROM source_users ORDER BY user_id",
            |row| {
                Ok(UserRecord {
                    user_id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    email: row.get(3)?,
                    phone: row.get(4)?,
                    country: row.get(5)?,
                    registered_at: row.get(6)?,
                })
            },
        )
    }
}

impl SourceEntity for SalesManagerRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT manager_id, first_name, last_name, email, hired_at
             FROM source_sales_managers ORDER BY manager_id",
            |row| {
                Ok(SalesManagerRecord {
                    manager_id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    email: row.get(3)?,
                    hired_at: row.get(4)?,
                })
            },
        )
    }
}

impl SourceEntity for TrafficSourceRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT source_id, name, channel, details
             FROM source_traffic_sources ORDER BY source_id",
            |row| {
                Ok(TrafficSourceRecord {
                    source_id: row.get(0)?,
                    name: row.get(1)?,
                    channel: row.get(2)?,
                    details: row.get(3)?,
                })
            },
        )
    }
}

impl SourceEntity for CourseRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT c.course_id, c.title, c.subject, c.description, c.price_in_rubbles,
                    c.created_at, cat.name, sub.name
             FROM source_courses c
             JOIN source_categories cat ON cat.category_id = c.category_id
             JOIN source_subcategories sub ON sub.subcategory_id = c.subcategory_id
             ORDER BY c.course_id",
            |row| {
                Ok(CourseRecord {
                    course_id: row.get(0)?,
                    title: row.get(1)?,
                    subject: row.get(2)?,
                    description: row.get(3)?,
                    price_in_rubbles: row.get(4)?,
                    created_at: row.get(5)?,
                    category: row.get(6)?,
                    sub_category: row.get(7)?,
                })
            },
        )
    }
}

impl SourceEntity for EnrollmentRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT enrollment_id, user_id, course_id, enrolled_at, status
             FROM source_enrollments ORDER BY enrollment_id",
            |row| {
                Ok(EnrollmentRecord {
                    enrollment_id: row.get(0)?,
                    user_id: row.get(1)?,
                    course_id: row.get(2)?,
                    enrolled_at: row.get(3)?,
                    status: status_column(row, 4)?,
                })
            },
        )
    }
}

impl SourceEntity for SaleRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT sale_id, enrollment_id, manager_id, sale_date, cost_in_rubbles
             FROM source_sales ORDER BY sale_id",
            |row| {
                Ok(SaleRecord {
                    sale_id: row.get(0)?,
                    enrollment_id: row.get(1)?,
                    manager_id: row.get(2)?,
                    sale_date: row.get(3)?,
                    cost_in_rubbles: row.get(4)?,
                })
            },
        )
    }
}

impl SourceEntity for UserTrafficRecord {
    fn read_source(conn: &Connection) -> Result<Vec<Self>> {
        query_all(
            conn,
            "SELECT user_id, source_id, referred_at, campaign_code
             FROM source_user_traffic ORDER BY user_id, source_id, referred_at",
            |row| {
                Ok(UserTrafficRecord {
                    user_id: row.get(0)?,
                    source_id: row.get(1)?,
                    referred_at: row.get(2)?,
                    campaign_code: row.get(3)?,
                    feed: SourceFeed::Oltp,
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrations};

    fn setup() -> Connection {
        let mut conn = db::open_in_memory().unwrap();
        migrations::apply_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_courses_are_read_with_category_names() {
        let conn = setup();
        conn.execute_batch(
            "INSERT INTO source_categories VALUES (1, 'Programming');
             INSERT INTO source_subcategories VALUES (7, 'Rust');
             INSERT INTO source_courses VALUES
                (2, 'Ownership', 'CS', NULL, 4900, '2025-01-01 09:00:00', 1, 7);",
        )
        .unwrap();

        let courses = CourseRecord::read_source(&conn).unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].category, "Programming");
        assert_eq!(courses[0].sub_category, "Rust");
        assert_eq!(courses[0].description, None);
    }

    #[test]
    fn test_user_traffic_rows_belong_to_oltp_feed() {
        let conn = setup();
        conn.execute_batch(
            "INSERT INTO source_users VALUES
                (1, 'Alice', 'Smith', 'a@example.com', NULL, 'RU', '2025-01-01 00:00:00');
             INSERT INTO source_traffic_sources VALUES (3, 'Search', 'organic', NULL);
             INSERT INTO source_user_traffic VALUES (1, 3, '2025-01-02 08:30:00', 'spring');",
        )
        .unwrap();

        let rows = UserTrafficRecord::read_source(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feed, SourceFeed::Oltp);
        assert_eq!(rows[0].campaign_code.as_deref(), Some("spring"));
    }
}
