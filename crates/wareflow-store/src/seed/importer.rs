//! Seed importer

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use crate::seed::format::SeedDocument;
use crate::seed::parser::parse_seed_file;
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use wareflow_core::{log_op_end, log_op_error, log_op_start};

/// Rows upserted per source table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub users: usize,
    pub sales_managers: usize,
    pub categories: usize,
    pub subcategories: usize,
    pub courses: usize,
    pub traffic_sources: usize,
    pub enrollments: usize,
    pub sales: usize,
    pub user_traffic: usize,
}

impl SeedSummary {
    pub fn total(&self) -> usize {
        self.users
            + self.sales_managers
            + self.categories
            + self.subcategories
            + self.courses
            + self.traffic_sources
            + self.enrollments
            + self.sales
            + self.user_traffic
    }
}

/// Parse a seed file and upsert it into the source tables
pub fn import_seed(path: &Path, conn: &mut Connection) -> Result<SeedSummary> {
    let seed = parse_seed_file(path)?;
    import_seed_document(&seed, conn)
}

/// Upsert a parsed seed in one transaction, parents before children
///
/// Rows absent from the seed are left in place.
pub fn import_seed_document(seed: &SeedDocument, conn: &mut Connection) -> Result<SeedSummary> {
    let start = Instant::now();
    log_op_start!("seed_import");

    let result = upsert_all(seed, conn);
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(summary) => {
            log_op_end!("seed_import", duration_ms = duration_ms, rows = summary.total());
        }
        Err(err) => {
            log_op_error!("seed_import", err.clone(), duration_ms = duration_ms);
        }
    }
    result
}

fn upsert_all(seed: &SeedDocument, conn: &mut Connection) -> Result<SeedSummary> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    let summary = SeedSummary {
        users: upsert_users(&tx, seed)?,
        sales_managers: upsert_sales_managers(&tx, seed)?,
        categories: upsert_categories(&tx, seed)?,
        subcategories: upsert_subcategories(&tx, seed)?,
        courses: upsert_courses(&tx, seed)?,
        traffic_sources: upsert_traffic_sources(&tx, seed)?,
        enrollments: upsert_enrollments(&tx, seed)?,
        sales: upsert_sales(&tx, seed)?,
        user_traffic: upsert_user_traffic(&tx, seed)?,
    };
    tx.commit().map_err(from_rusqlite)?;
    Ok(summary)
}

fn upsert_users(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_users
                (user_id, first_name, last_name, email, phone, country, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (user_id) DO UPDATE SET
                first_name = excluded.first_name, last_name = excluded.last_name,
                email = excluded.email, phone = excluded.phone, country = excluded.country,
                registered_at = excluded.registered_at",
        )
        .map_err(from_rusqlite)?;
    for u in &seed.users {
        stmt.execute(params![
            u.user_id,
            u.first_name,
            u.last_name,
            u.email,
            u.phone,
            u.country,
            u.registered_at
        ])
        .map_err(from_rusqlite)?;
    }
    Ok(seed.users.len())
}

fn upsert_sales_managers(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_sales_managers (manager_id, first_name, last_name, email, hired_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (manager_id) DO UPDATE SET
                first_name = excluded.first_name, last_name = excluded.last_name,
                email = excluded.email, hired_at = excluded.hired_at",
        )
        .map_err(from_rusqlite)?;
    for m in &seed.sales_managers {
        stmt.execute(params![
            m.manager_id,
            m.first_name,
            m.last_name,
            m.email,
            m.hired_at
        ])
        .map_err(from_rusqlite)?;
    }
    Ok(seed.sales_managers.len())
}

fn upsert_categories(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_categories (category_id, name) VALUES (?1, ?2)
             ON CONFLICT (category_id) DO UPDATE SET name = excluded.name",
        )
        .map_err(from_rusqlite)?;
    for c in &seed.categories {
        stmt.execute(params![c.category_id, c.name])
            .map_err(from_rusqlite)?;
    }
    Ok(seed.categories.len())
}

fn upsert_subcategories(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_subcategories (subcategory_id, name) VALUES (?1, ?2)
             ON CONFLICT (subcategory_id) DO UPDATE SET name = excluded.name",
        )
        .map_err(from_rusqlite)?;
    for s in &seed.subcategories {
        stmt.execute(params![s.subcategory_id, s.name])
            .map_err(from_rusqlite)?;
    }
    Ok(seed.subcategories.len())
}

fn upsert_courses(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_courses (course_id, title, subject, description,
                price_in_rubbles, created_at, category_id, subcategory_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (course_id) DO UPDATE SET
                title = excluded.title, subject = excluded.subject,
                description = excluded.description,
                price_in_rubbles = excluded.price_in_rubbles,
                created_at = excluded.created_at, category_id = excluded.category_id,
                subcategory_id = excluded.subcategory_id",
        )
        .map_err(from_rusqlite)?;
    for c in &seed.courses {
        stmt.execute(params![
            c.course_id,
            c.title,
            c.subject,
            c.description,
            c.price_in_rubbles,
            c.created_at,
            c.category_id,
            c.subcategory_id
        ])
        .map_err(from_rusqlite)?;
    }
    Ok(seed.courses.len())
}

fn upsert_traffic_sources(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_traffic_sources (source_id, name, channel, details)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (source_id) DO UPDATE SET
                name = excluded.name, channel = excluded.channel, details = excluded.details",
        )
        .map_err(from_rusqlite)?;
    for t in &seed.traffic_sources {
        stmt.execute(params![t.source_id, t.name, t.channel, t.details])
            .map_err(from_rusqlite)?;
    }
    Ok(seed.traffic_sources.len())
}

fn upsert_enrollments(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_enrollments (enrollment_id, user_id, course_id, enrolled_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (enrollment_id) DO UPDATE SET
                user_id = excluded.user_id, course_id = excluded.course_id,
                enrolled_at = excluded.enrolled_at, status = excluded.status",
        )
        .map_err(from_rusqlite)?;
    for e in &seed.enrollments {
        stmt.execute(params![
            e.enrollment_id,
            e.user_id,
            e.course_id,
            e.enrolled_at,
            e.status.as_str()
        ])
        .map_err(from_rusqlite)?;
    }
    Ok(seed.enrollments.len())
}

fn upsert_sales(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_sales (sale_id, enrollment_id, manager_id, sale_date, cost_in_rubbles)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (sale_id) DO UPDATE SET
                enrollment_id = excluded.enrollment_id, manager_id = excluded.manager_id,
                sale_date = excluded.sale_date, cost_in_rubbles = excluded.cost_in_rubbles",
        )
        .map_err(from_rusqlite)?;
    for s in &seed.sales {
        stmt.execute(params![
            s.sale_id,
            s.enrollment_id,
            s.manager_id,
            s.sale_date,
            s.cost_in_rubbles
        ])
        .map_err(from_rusqlite)?;
    }
    Ok(seed.sales.len())
}

fn upsert_user_traffic(tx: &Transaction<'_>, seed: &SeedDocument) -> Result<usize> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO source_user_traffic (user_id, source_id, referred_at, campaign_code)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, source_id, referred_at) DO UPDATE SET
                campaign_code = excluded.campaign_code",
        )
        .map_err(from_rusqlite)?;
    for t in &seed.user_traffic {
        stmt.execute(params![t.user_id, t.source_id, t.referred_at, t.campaign_code])
            .map_err(from_rusqlite)?;
    }
    Ok(seed.user_traffic.len())
}
