//! Migrations compiled into the binary

use sha2::{Digest, Sha256};

pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

impl Migration {
    /// Hex SHA-256 of the SQL text
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.sql.as_bytes()))
    }
}

macro_rules! migration {
    ($id:literal) => {
        Migration {
            id: $id,
            sql: include_str!(concat!("../../migrations/", $id, ".sql")),
        }
    };
}

/// Application order
pub const MIGRATIONS: [Migration; 4] = [
    migration!("001_source_schema"),
    migration!("002_warehouse_schema"),
    migration!("003_star_schema"),
    migration!("004_batch_ledger"),
];
