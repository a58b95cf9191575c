//! User traffic CSV feed
//!
//! Header: `user_id,source_id,referred_at,campaign_code`. Rows load as user
//! traffic from the CSV feed and go through the same detector and store as
//! the OLTP rows.

#![allow(clippy::result_large_err)]

use crate::errors::{csv_error, io_error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use wareflow_core::calendar::parse_timestamp;
use wareflow_core::detect::Tracked;
use wareflow_core::model::{SourceFeed, UserTrafficRecord};

#[derive(Debug, Deserialize)]
struct CsvRow {
    user_id: i64,
    source_id: i64,
    referred_at: String,
    #[serde(default)]
    campaign_code: Option<String>,
}

/// Read the feed file
pub fn read_user_traffic_csv(path: &Path) -> Result<Vec<UserTrafficRecord>> {
    let file =
        std::fs::File::open(path).map_err(|e| io_error("read_user_traffic_csv", path, e))?;
    read_user_traffic(file)
}

/// Parse feed rows from any reader
///
/// Rows are returned ordered by business key. A key repeated in the file
/// keeps its last row.
pub fn read_user_traffic<R: io::Read>(reader: R) -> Result<Vec<UserTrafficRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut by_key = BTreeMap::new();
    for (index, row) in csv_reader.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = row.map_err(|e| csv_error(&format!("line {}: {}", line, e)))?;
        let referred_at = parse_timestamp(&row.referred_at).ok_or_else(|| {
            csv_error(&format!(
                "line {}: unreadable referred_at '{}'",
                line, row.referred_at
            ))
        })?;
        let record = UserTrafficRecord {
            user_id: row.user_id,
            source_id: row.source_id,
            referred_at,
            campaign_code: row.campaign_code.filter(|c| !c.is_empty()),
            feed: SourceFeed::Csv,
        };
        if let Some(previous) = by_key.insert(record.business_key(), record) {
            tracing::warn!(
                component = module_path!(),
                op = "read_user_traffic_csv",
                line,
                business_key = %previous.business_key(),
                "duplicate referral in feed, keeping the later row"
            );
        }
    }

    Ok(by_key.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wareflow_core::errors::ExErrorKind;

    #[test]
    fn test_reads_rows_with_optional_campaign() {
        let data = "user_id,source_id,referred_at,campaign_code\n\
                    2,1,2025-01-05 10:00:00,\n\
                    1,3,2025-01-01T08:00:00,spring\n";

        let rows = read_user_traffic(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, 1);
        assert_eq!(rows[0].campaign_code.as_deref(), Some("spring"));
        assert_eq!(rows[1].campaign_code, None);
        assert!(rows.iter().all(|r| r.feed == SourceFeed::Csv));
    }

    #[test]
    fn test_duplicate_key_keeps_last_row() {
        let data = "user_id,source_id,referred_at,campaign_code\n\
                    1,3,2025-01-01 08:00:00,a\n\
                    1,3,2025-01-01 08:00:00,b\n";

        let rows = read_user_traffic(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].campaign_code.as_deref(), Some("b"));
    }

    #[test]
    fn test_bad_timestamp_names_the_line() {
        let data = "user_id,source_id,referred_at,campaign_code\n\
                    1,3,last tuesday,a\n";

        let err = read_user_traffic(data.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
        assert!(err.message().contains("line 2"));
    }

    #[test]
    fn test_reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_id,source_id,referred_at,campaign_code").unwrap();
        writeln!(file, "4,2,2025-03-01 00:00:00,promo").unwrap();

        let rows = read_user_traffic_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, 4);
    }

    #[test]
    fn test_missing_file_is_io_error_naming_the_path() {
        let err = read_user_traffic_csv(Path::new("/nonexistent/traffic.csv")).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Io);
        assert!(err.message().contains("/nonexistent/traffic.csv"));
    }
}
