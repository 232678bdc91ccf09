//! Failed submission log
//!
//! Submissions rejected before reaching the observation store are recorded
//! here for audit. They never contribute to aggregation.

use accessmap_common::{GeoPoint, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::timestamp_from_row;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedSubmission {
    pub id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub user_ref: String,
    /// Absent when the submitted location itself was invalid
    pub location: Option<GeoPoint>,
    pub error_kind: String,
    pub message: String,
}

pub async fn record<'e, E>(executor: E, failure: &FailedSubmission) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO failed_submissions
            (id, attempted_at_us, user_ref, latitude, longitude, error_kind, message)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(failure.id.to_string())
    .bind(failure.attempted_at.timestamp_micros())
    .bind(&failure.user_ref)
    .bind(failure.location.map(|p| p.latitude))
    .bind(failure.location.map(|p| p.longitude))
    .bind(&failure.error_kind)
    .bind(&failure.message)
    .execute(executor)
    .await?;

    Ok(())
}

/// Most recent failures first
pub async fn list_recent<'e, E>(executor: E, limit: i64) -> Result<Vec<FailedSubmission>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, attempted_at_us, user_ref, latitude, longitude, error_kind, message \
         FROM failed_submissions ORDER BY attempted_at_us DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.try_get("id")?;
            let latitude: Option<f64> = row.try_get("latitude")?;
            let longitude: Option<f64> = row.try_get("longitude")?;
            Ok(FailedSubmission {
                id: Uuid::parse_str(&id)
                    .map_err(|e| accessmap_common::Error::Corrupt(format!("failed submission id {}: {}", id, e)))?,
                attempted_at: timestamp_from_row(row.try_get("attempted_at_us")?, "attempted_at_us")?,
                user_ref: row.try_get("user_ref")?,
                location: latitude
                    .zip(longitude)
                    .map(|(latitude, longitude)| GeoPoint { latitude, longitude }),
                error_kind: row.try_get("error_kind")?,
                message: row.try_get("message")?,
            })
        })
        .collect()
}

pub async fn count<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM failed_submissions")
        .fetch_one(executor)
        .await?)
}
