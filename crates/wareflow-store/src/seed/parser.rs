//! Seed parsing and validation

#![allow(clippy::result_large_err)]

use crate::errors::{io_error, seed_validation, Result};
use crate::seed::format::SeedDocument;
use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::path::Path;

/// Parse a seed file from a path
pub fn parse_seed_file(path: &Path) -> Result<SeedDocument> {
    let content = fs::read_to_string(path).map_err(|e| io_error("parse_seed_file", path, e))?;
    parse_seed_str(&content)
}

/// Parse a seed from a string
pub fn parse_seed_str(content: &str) -> Result<SeedDocument> {
    let seed: SeedDocument = serde_yaml::from_str(content)
        .map_err(|e| seed_validation(&format!("YAML parse error: {}", e)))?;
    validate_seed(&seed)?;
    Ok(seed)
}

fn ensure_unique<T, K, F>(table: &str, rows: &[T], key: F) -> Result<()>
where
    K: Eq + Hash + std::fmt::Debug,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    for row in rows {
        let k = key(row);
        if seen.contains(&k) {
            return Err(seed_validation(&format!(
                "Duplicate key {:?} in {}",
                k, table
            )));
        }
        seen.insert(k);
    }
    Ok(())
}

fn ensure_non_negative(table: &str, column: &str, values: impl Iterator<Item = i64>) -> Result<()> {
    for value in values {
        if value < 0 {
            return Err(seed_validation(&format!(
                "{}.{} must not be negative, got {}",
                table, column, value
            )));
        }
    }
    Ok(())
}

fn validate_seed(seed: &SeedDocument) -> Result<()> {
    ensure_unique("users", &seed.users, |r| r.user_id)?;
    ensure_unique("sales_managers", &seed.sales_managers, |r| r.manager_id)?;
    ensure_unique("categories", &seed.categories, |r| r.category_id)?;
    ensure_unique("subcategories", &seed.subcategories, |r| r.subcategory_id)?;
    ensure_unique("courses", &seed.courses, |r| r.course_id)?;
    ensure_unique("traffic_sources", &seed.traffic_sources, |r| r.source_id)?;
    ensure_unique("enrollments", &seed.enrollments, |r| r.enrollment_id)?;
    ensure_unique("sales", &seed.sales, |r| r.sale_id)?;
    ensure_unique("sales", &seed.sales, |r| r.enrollment_id)?;
    ensure_unique("user_traffic", &seed.user_traffic, |r| {
        (r.user_id, r.source_id, r.referred_at)
    })?;

    ensure_non_negative(
        "courses",
        "price_in_rubbles",
        seed.courses.iter().map(|c| c.price_in_rubbles),
    )?;
    ensure_non_negative(
        "sales",
        "cost_in_rubbles",
        seed.sales.iter().map(|s| s.cost_in_rubbles),
    )?;

    Ok(())
}
