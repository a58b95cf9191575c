//! Seed document schema

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use wareflow_core::calendar::parse_timestamp;
use wareflow_core::model::EnrollmentStatus;

fn timestamp<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("unreadable timestamp '{}'", text)))
}

/// Top-level seed document; every list is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDocument {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub sales_managers: Vec<SeedSalesManager>,
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub subcategories: Vec<SeedSubcategory>,
    #[serde(default)]
    pub courses: Vec<SeedCourse>,
    #[serde(default)]
    pub traffic_sources: Vec<SeedTrafficSource>,
    #[serde(default)]
    pub enrollments: Vec<SeedEnrollment>,
    #[serde(default)]
    pub sales: Vec<SeedSale>,
    #[serde(default)]
    pub user_traffic: Vec<SeedUserTraffic>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    pub registered_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSalesManager {
    pub manager_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(deserialize_with = "timestamp")]
    pub hired_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCategory {
    pub category_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSubcategory {
    pub subcategory_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCourse {
    pub course_id: i64,
    pub title: String,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_in_rubbles: i64,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: NaiveDateTime,
    pub category_id: i64,
    pub subcategory_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTrafficSource {
    pub source_id: i64,
    pub name: String,
    pub channel: String,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedEnrollment {
    pub enrollment_id: i64,
    pub user_id: i64,
    pub course_id: i64,
    #[serde(deserialize_with = "timestamp")]
    pub enrolled_at: NaiveDateTime,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSale {
    pub sale_id: i64,
    pub enrollment_id: i64,
    pub manager_id: i64,
    #[serde(deserialize_with = "timestamp")]
    pub sale_date: NaiveDateTime,
    pub cost_in_rubbles: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUserTraffic {
    pub user_id: i64,
    pub source_id: i64,
    #[serde(deserialize_with = "timestamp")]
    pub referred_at: NaiveDateTime,
    #[serde(default)]
    pub campaign_code: Option<String>,
}
