//! Typed records, one per entity type
//!
//! Child records carry the *business keys* of their parents. The store binds
//! them to surrogate keys on write and reads them back through those bound
//! keys, so comparing records compares what each version actually points at.

use super::entity::{EntityKind, SourceFeed};
use crate::detect::Tracked;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Treat a missing optional text and an empty one as the same value
pub fn normalize_optional_text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn same_optional_text(a: &Option<String>, b: &Option<String>) -> bool {
    normalize_optional_text(a) == normalize_optional_text(b)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub registered_at: NaiveDateTime,
}

impl Tracked for UserRecord {
    type Key = i64;
    const KIND: EntityKind = EntityKind::User;

    fn business_key(&self) -> i64 {
        self.user_id
    }

    fn same_tracked(&self, other: &Self) -> bool {
        self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.email == other.email
            && same_optional_text(&self.phone, &other.phone)
            && same_optional_text(&self.country, &other.country)
            && self.registered_at == other.registered_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesManagerRecord {
    pub manager_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub hired_at: NaiveDateTime,
}

impl Tracked for SalesManagerRecord {
    type Key = i64;
    const KIND: EntityKind = EntityKind::SalesManager;

    fn business_key(&self) -> i64 {
        self.manager_id
    }

    fn same_tracked(&self, other: &Self) -> bool {
        self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.email == other.email
            && self.hired_at == other.hired_at
    }
}

/// Course denormalized with its category and sub-category names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRecord {
    pub course_id: i64,
    pub title: String,
    pub subject: String,
    pub description: Option<String>,
    pub price_in_rubbles: i64,
    pub created_at: NaiveDateTime,
    pub category: String,
    pub sub_category: String,
}

impl Tracked for CourseRecord {
    type Key = i64;
    const KIND: EntityKind = EntityKind::Course;

    fn business_key(&self) -> i64 {
        self.course_id
    }

    fn same_tracked(&self, other: &Self) -> bool {
        self.title == other.title
            && self.subject == other.subject
            && same_optional_text(&self.description, &other.description)
            && self.price_in_rubbles == other.price_in_rubbles
            && self.created_at == other.created_at
            && self.category == other.category
            && self.sub_category == other.sub_category
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSourceRecord {
    pub source_id: i64,
    pub name: String,
    pub channel: String,
    pub details: Option<String>,
}

impl Tracked for TrafficSourceRecord {
    type Key = i64;
    const KIND: EntityKind = EntityKind::TrafficSource;

    fn business_key(&self) -> i64 {
        self.source_id
    }

    fn same_tracked(&self, other: &Self) -> bool {
        self.name == other.name
            && self.channel == other.channel
            && same_optional_text(&self.details, &other.details)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "active" => Some(EnrollmentStatus::Active),
            "completed" => Some(EnrollmentStatus::Completed),
            "cancelled" => Some(EnrollmentStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRecord {
    pub enrollment_id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub enrolled_at: NaiveDateTime,
    pub status: EnrollmentStatus,
}

impl Tracked for EnrollmentRecord {
    type Key = i64;
    const KIND: EntityKind = EntityKind::Enrollment;

    fn business_key(&self) -> i64 {
        self.enrollment_id
    }

    fn same_tracked(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.course_id == other.course_id
            && self.enrolled_at == other.enrolled_at
            && self.status == other.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRecord {
    pub sale_id: i64,
    pub enrollment_id: i64,
    pub manager_id: i64,
    pub sale_date: NaiveDateTime,
    pub cost_in_rubbles: i64,
}

impl Tracked for SaleRecord {
    type Key = i64;
    const KIND: EntityKind = EntityKind::Sale;

    fn business_key(&self) -> i64 {
        self.sale_id
    }

    fn same_tracked(&self, other: &Self) -> bool {
        self.enrollment_id == other.enrollment_id
            && self.manager_id == other.manager_id
            && self.sale_date == other.sale_date
            && self.cost_in_rubbles == other.cost_in_rubbles
    }
}

/// Composite business key of a referral
///
/// The feed is part of the key so the OLTP and CSV feeds version the same
/// referral independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserTrafficKey {
    pub user_id: i64,
    pub source_id: i64,
    pub referred_at: NaiveDateTime,
    pub feed: SourceFeed,
}

impl fmt::Display for UserTrafficKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.user_id,
            self.source_id,
            crate::calendar::format_timestamp(self.referred_at),
            self.feed.id()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTrafficRecord {
    pub user_id: i64,
    pub source_id: i64,
    pub referred_at: NaiveDateTime,
    pub campaign_code: Option<String>,
    pub feed: SourceFeed,
}

impl Tracked for UserTrafficRecord {
    type Key = UserTrafficKey;
    const KIND: EntityKind = EntityKind::UserTraffic;

    fn business_key(&self) -> UserTrafficKey {
        UserTrafficKey {
            user_id: self.user_id,
            source_id: self.source_id,
            referred_at: self.referred_at,
            feed: self.feed,
        }
    }

    fn same_tracked(&self, other: &Self) -> bool {
        same_optional_text(&self.campaign_code, &other.campaign_code)
    }
}
