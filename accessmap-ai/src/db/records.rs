//! Accessibility record persistence (derived state)

use accessmap_common::geo::BoundingBox;
use accessmap_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::collections::BTreeMap;

use super::entrances::{entrance_from_row, longitude_clause};
use super::timestamp_from_row;
use crate::types::{AccessibilityRecord, AggregatedAttribute, Entrance, EntranceId};
use crate::vocabulary::Attribute;

/// Replace the stored record for `record.entrance_id`
pub async fn upsert<'e, E>(executor: E, record: &AccessibilityRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let attributes = serde_json::to_string(&record.attributes)
        .map_err(|e| Error::Internal(format!("Failed to serialize record: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO accessibility_records (entrance_id, attributes, observation_count, computed_at_us)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(entrance_id) DO UPDATE SET
            attributes = excluded.attributes,
            observation_count = excluded.observation_count,
            computed_at_us = excluded.computed_at_us
        "#,
    )
    .bind(record.entrance_id.0)
    .bind(attributes)
    .bind(record.observation_count as i64)
    .bind(record.computed_at.timestamp_micros())
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn get<'e, E>(executor: E, entrance_id: EntranceId) -> Result<Option<AccessibilityRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT entrance_id, attributes, observation_count, computed_at_us \
         FROM accessibility_records WHERE entrance_id = ?",
    )
    .bind(entrance_id.0)
    .fetch_optional(executor)
    .await?;

    row.map(|r| record_from_row(&r)).transpose()
}

pub async fn delete<'e, E>(executor: E, entrance_id: EntranceId) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM accessibility_records WHERE entrance_id = ?")
        .bind(entrance_id.0)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Entrances inside a bounding box together with their records
///
/// Entrances without a record are skipped: they have no supporting evidence.
pub async fn list_within<'e, E>(executor: E, bbox: &BoundingBox) -> Result<Vec<(Entrance, AccessibilityRecord)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (lon_clause, lon_a, lon_b) = longitude_clause(&bbox.longitudes);
    let sql = format!(
        "SELECT e.id, e.latitude, e.longitude, e.venue_ref, e.created_at_us, \
                r.entrance_id, r.attributes, r.observation_count, r.computed_at_us \
         FROM entrances e JOIN accessibility_records r ON r.entrance_id = e.id \
         WHERE e.latitude BETWEEN ? AND ? AND {} ORDER BY e.id",
        lon_clause.replace("longitude", "e.longitude")
    );

    let rows = sqlx::query(&sql)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(lon_a)
        .bind(lon_b)
        .fetch_all(executor)
        .await?;

    rows.iter()
        .map(|row| Ok((entrance_from_row(row)?, record_from_row(row)?)))
        .collect()
}

fn record_from_row(row: &SqliteRow) -> Result<AccessibilityRecord> {
    let entrance_id = EntranceId(row.try_get("entrance_id")?);

    let attributes_json: String = row.try_get("attributes")?;
    let attributes: BTreeMap<Attribute, AggregatedAttribute> = serde_json::from_str(&attributes_json)
        .map_err(|e| Error::Corrupt(format!("record for entrance {}: {}", entrance_id, e)))?;

    let observation_count: i64 = row.try_get("observation_count")?;

    Ok(AccessibilityRecord {
        entrance_id,
        attributes,
        observation_count: observation_count.max(0) as usize,
        computed_at: timestamp_from_row(row.try_get("computed_at_us")?, "computed_at_us")?,
    })
}
