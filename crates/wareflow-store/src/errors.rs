//! Error helpers for wareflow-store
//!
//! Wraps wareflow-core ExError with store-specific constructors

use rusqlite::ErrorCode;
use wareflow_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::InvariantViolation)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// Create a seed validation error
pub fn seed_validation(reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("seed_import")
        .with_message(reason.to_string())
}

/// Create a CSV feed error
pub fn csv_error(reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("read_user_traffic_csv")
        .with_message(reason.to_string())
}

/// Create a database error from rusqlite::Error
///
/// Busy and locked databases map to `TransientIo`; everything else is
/// `Persistence`.
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            ExErrorKind::TransientIo
        }
        _ => ExErrorKind::Persistence,
    };
    ExError::new(kind)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create an error for a file that cannot be read
pub fn io_error(operation: &str, path: &std::path::Path, err: std::io::Error) -> ExError {
    let kind = match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ExErrorKind::TransientIo,
        _ => ExErrorKind::Io,
    };
    ExError::new(kind)
        .with_op(operation)
        .with_message(format!("{}: {}", path.display(), err))
}

/// Create an error for a stored value that does not parse
pub fn corrupt_value(table: &str, column: &str, value: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("decode_row")
        .with_message(format!("{}.{} holds unreadable value '{}'", table, column, value))
}
