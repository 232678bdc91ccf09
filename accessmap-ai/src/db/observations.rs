//! Append-only observation store
//!
//! The normal flow only appends and lists. Moving an observation to another
//! entrance is the single administrative mutation, and the schema triggers
//! reject every other UPDATE as well as DELETE.

use accessmap_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::collections::BTreeMap;

use super::timestamp_from_row;
use crate::types::{EntranceId, NewObservation, Observation, ObservationId};
use crate::vocabulary::{Attribute, AttributeSet, AttributeValue, ConfidenceValue, VocabularyVersion};

const SELECT_COLUMNS: &str = "SELECT id, entrance_id, submitted_at_us, raw_image_ref, vocabulary_version, \
                              attributes, quarantined, source_user_ref FROM observations";

/// Append one observation; returns its new id
pub async fn append<'e, E>(executor: E, entrance_id: EntranceId, observation: &NewObservation) -> Result<ObservationId>
where
    E: Executor<'e, Database = Sqlite>,
{
    let attributes = serde_json::to_string(&observation.attributes.values)
        .map_err(|e| Error::Internal(format!("Failed to serialize attributes: {}", e)))?;
    let quarantined = serde_json::to_string(&observation.attributes.quarantined)
        .map_err(|e| Error::Internal(format!("Failed to serialize quarantined keys: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO observations (
            entrance_id, submitted_at_us, raw_image_ref, vocabulary_version,
            attributes, quarantined, source_user_ref
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entrance_id.0)
    .bind(observation.submitted_at.timestamp_micros())
    .bind(&observation.raw_image_ref)
    .bind(i64::from(observation.attributes.version.0))
    .bind(attributes)
    .bind(quarantined)
    .bind(&observation.source_user_ref)
    .execute(executor)
    .await?;

    Ok(ObservationId(result.last_insert_rowid()))
}

pub async fn get<'e, E>(executor: E, id: ObservationId) -> Result<Option<Observation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql).bind(id.0).fetch_optional(executor).await?;
    row.map(|r| observation_from_row(&r)).transpose()
}

/// Full history of one entrance, oldest first (id breaks timestamp ties)
pub async fn list_by_entrance<'e, E>(executor: E, entrance_id: EntranceId) -> Result<Vec<Observation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{} WHERE entrance_id = ? ORDER BY submitted_at_us ASC, id ASC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(entrance_id.0).fetch_all(executor).await?;
    rows.iter().map(observation_from_row).collect()
}

pub async fn count<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM observations")
        .fetch_one(executor)
        .await?)
}

pub async fn count_by_entrance<'e, E>(executor: E, entrance_id: EntranceId) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM observations WHERE entrance_id = ?")
        .bind(entrance_id.0)
        .fetch_one(executor)
        .await?)
}

/// Observations referencing one stored image
pub async fn count_by_image_ref<'e, E>(executor: E, raw_image_ref: &str) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM observations WHERE raw_image_ref = ?")
        .bind(raw_image_ref)
        .fetch_one(executor)
        .await?)
}

/// Move an observation from `from` to another entrance (administrative only)
///
/// Fails with `NotFound` unless the observation is still on `from`.
pub async fn move_to_entrance<'e, E>(executor: E, id: ObservationId, from: EntranceId, target: EntranceId) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE observations SET entrance_id = ? WHERE id = ? AND entrance_id = ?")
        .bind(target.0)
        .bind(id.0)
        .bind(from.0)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("observation {} on entrance {}", id, from)));
    }
    Ok(())
}

/// Audit row for a reassignment
pub async fn record_reassignment<'e, E>(
    executor: E,
    id: ObservationId,
    from: EntranceId,
    to: EntranceId,
    reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO observation_reassignments
            (observation_id, from_entrance_id, to_entrance_id, reason, reassigned_at_us)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.0)
    .bind(from.0)
    .bind(to.0)
    .bind(reason)
    .bind(at.timestamp_micros())
    .execute(executor)
    .await?;

    Ok(())
}

fn observation_from_row(row: &SqliteRow) -> Result<Observation> {
    let id = ObservationId(row.try_get("id")?);

    let version: i64 = row.try_get("vocabulary_version")?;
    let version = u16::try_from(version)
        .map(VocabularyVersion)
        .map_err(|_| Error::Corrupt(format!("observation {} has vocabulary version {}", id, version)))?;

    let attributes_json: String = row.try_get("attributes")?;
    let values: BTreeMap<Attribute, ConfidenceValue<AttributeValue>> = serde_json::from_str(&attributes_json)
        .map_err(|e| Error::Corrupt(format!("observation {} attributes: {}", id, e)))?;

    let quarantined_json: String = row.try_get("quarantined")?;
    let quarantined = serde_json::from_str(&quarantined_json)
        .map_err(|e| Error::Corrupt(format!("observation {} quarantined keys: {}", id, e)))?;

    Ok(Observation {
        id,
        entrance_id: EntranceId(row.try_get("entrance_id")?),
        submitted_at: timestamp_from_row(row.try_get("submitted_at_us")?, "submitted_at_us")?,
        raw_image_ref: row.try_get("raw_image_ref")?,
        attributes: AttributeSet {
            version,
            values,
            quarantined,
        },
        source_user_ref: row.try_get("source_user_ref")?,
    })
}
