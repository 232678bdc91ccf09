//! Database access for accessmap-ai
//!
//! Free functions over any SQLite executor, so the same call works against
//! the pool (snapshot reads) or inside a submission transaction.
//! Schema creation lives in `accessmap_common::db`.

pub mod entrances;
pub mod failures;
pub mod observations;
pub mod records;
pub mod settings;

use accessmap_common::Error;
use thiserror::Error;

/// Observation store failure, surfaced after the single retry
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store write failed: {0}")]
    WriteFailure(String),
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        StoreError::WriteFailure(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::WriteFailure(err.to_string())
    }
}

/// Convert a stored microsecond timestamp, reporting corrupt rows
pub(crate) fn timestamp_from_row(micros: i64, column: &str) -> accessmap_common::Result<chrono::DateTime<chrono::Utc>> {
    accessmap_common::time::from_micros(micros)
        .ok_or_else(|| Error::Corrupt(format!("{} out of range: {}", column, micros)))
}
