use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity types loaded into the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    SalesManager,
    TrafficSource,
    Course,
    Enrollment,
    Sale,
    UserTraffic,
}

impl EntityKind {
    /// Load order: every parent precedes its children
    pub const TOPOLOGICAL: [EntityKind; 7] = [
        EntityKind::User,
        EntityKind::SalesManager,
        EntityKind::TrafficSource,
        EntityKind::Course,
        EntityKind::Enrollment,
        EntityKind::Sale,
        EntityKind::UserTraffic,
    ];

    /// Stable name used in logs, errors and the batch ledger
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::SalesManager => "sales_manager",
            EntityKind::TrafficSource => "traffic_source",
            EntityKind::Course => "course",
            EntityKind::Enrollment => "enrollment",
            EntityKind::Sale => "sale",
            EntityKind::UserTraffic => "user_traffic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::TOPOLOGICAL.into_iter().find(|k| k.name() == name)
    }

    /// Versioned warehouse table
    pub fn warehouse_table(&self) -> &'static str {
        match self {
            EntityKind::User => "wh_users",
            EntityKind::SalesManager => "wh_sales_managers",
            EntityKind::TrafficSource => "wh_traffic_sources",
            EntityKind::Course => "wh_courses",
            EntityKind::Enrollment => "wh_enrollments",
            EntityKind::Sale => "wh_sales",
            EntityKind::UserTraffic => "wh_user_traffic",
        }
    }

    /// Surrogate key column of the warehouse table
    pub fn surrogate_key_column(&self) -> &'static str {
        match self {
            EntityKind::User => "user_sk",
            EntityKind::SalesManager => "sales_manager_sk",
            EntityKind::TrafficSource => "traffic_source_sk",
            EntityKind::Course => "course_sk",
            EntityKind::Enrollment => "enrollment_sk",
            EntityKind::Sale => "sale_sk",
            EntityKind::UserTraffic => "user_traffic_sk",
        }
    }

    /// Entity types whose surrogate keys this entity binds
    pub fn parents(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Enrollment => &[EntityKind::User, EntityKind::Course],
            EntityKind::Sale => &[EntityKind::Enrollment, EntityKind::SalesManager],
            EntityKind::UserTraffic => &[EntityKind::User, EntityKind::TrafficSource],
            _ => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Origin of a warehouse row, persisted as `source_identifier`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceFeed {
    /// The relational OLTP source
    Oltp,
    /// The user traffic CSV file
    Csv,
}

impl SourceFeed {
    pub fn id(&self) -> i64 {
        match self {
            SourceFeed::Oltp => 1,
            SourceFeed::Csv => 2,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(SourceFeed::Oltp),
            2 => Some(SourceFeed::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFeed::Oltp => f.write_str("oltp"),
            SourceFeed::Csv => f.write_str("csv"),
        }
    }
}
