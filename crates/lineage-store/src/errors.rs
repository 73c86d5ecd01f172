//! Error helpers for lineage-store
//!
//! Everything here returns the core `ExError`; these helpers keep kinds and
//! messages consistent across the store.

use lineage_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

pub fn object_missing(location: &str) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_op("object_get")
        .with_entity_id(location)
        .with_message("Stored object not found")
}

pub fn object_corrupted(location: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::Corrupted)
        .with_op("object_get")
        .with_entity_id(location)
        .with_message(format!("Stored bytes hash to {}", actual))
}

pub fn invalid_location(location: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("object_location")
        .with_message(format!("Not a content address: {:?}", location))
}

pub fn version_not_found(version_id: &str) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_entity_id(version_id)
        .with_message("Version not found")
}

pub fn version_conflict(version_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Conflict)
        .with_entity_id(version_id)
        .with_message(reason.to_string())
}

/// Map a rusqlite error; constraint violations become `Conflict`
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    let kind = match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => ExErrorKind::Conflict,
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            ExErrorKind::StorageFailure
        }
        _ => ExErrorKind::Persistence,
    };
    ExError::new(kind).with_op("sqlite").with_message(err.to_string())
}

/// Map an IO error raised by object storage
///
/// Object storage IO failures are `StorageFailure` so the retrying adapter
/// picks them up.
pub fn storage_io(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::StorageFailure)
        .with_op(operation.to_string())
        .with_source(ExError::new(ExErrorKind::Io).with_message(err.to_string()))
        .with_message(format!("{} failed", operation))
}

pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

pub fn json_error(operation: &str, err: serde_json::Error) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}
