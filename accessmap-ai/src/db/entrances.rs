//! Entrance persistence

use accessmap_common::geo::{BoundingBox, LongitudeRange};
use accessmap_common::{GeoPoint, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::timestamp_from_row;
use crate::types::{Entrance, EntranceId};

/// Insert a new entrance and return it with its assigned id
pub async fn insert<'e, E>(
    executor: E,
    location: GeoPoint,
    venue_ref: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<Entrance>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO entrances (latitude, longitude, venue_ref, created_at_us) VALUES (?, ?, ?, ?)",
    )
    .bind(location.latitude)
    .bind(location.longitude)
    .bind(venue_ref)
    .bind(created_at.timestamp_micros())
    .execute(executor)
    .await?;

    Ok(Entrance {
        id: EntranceId(result.last_insert_rowid()),
        location,
        venue_ref: venue_ref.map(str::to_string),
        created_at,
    })
}

pub async fn get<'e, E>(executor: E, id: EntranceId) -> Result<Option<Entrance>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, latitude, longitude, venue_ref, created_at_us FROM entrances WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(executor)
    .await?;

    row.map(|r| entrance_from_row(&r)).transpose()
}

/// Entrances inside a bounding box (coarse pre-filter, ordered by id)
pub async fn list_within<'e, E>(executor: E, bbox: &BoundingBox) -> Result<Vec<Entrance>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (lon_clause, lon_a, lon_b) = longitude_clause(&bbox.longitudes);
    let sql = format!(
        "SELECT id, latitude, longitude, venue_ref, created_at_us FROM entrances \
         WHERE latitude BETWEEN ? AND ? AND {} ORDER BY id",
        lon_clause
    );

    let rows = sqlx::query(&sql)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(lon_a)
        .bind(lon_b)
        .fetch_all(executor)
        .await?;

    rows.iter().map(entrance_from_row).collect()
}

/// Every entrance id, ascending
pub async fn list_ids<'e, E>(executor: E) -> Result<Vec<EntranceId>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM entrances ORDER BY id")
        .fetch_all(executor)
        .await?;
    Ok(ids.into_iter().map(EntranceId).collect())
}

pub async fn count<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM entrances")
        .fetch_one(executor)
        .await?)
}

/// SQL fragment plus its two bind values for a longitude range
///
/// Always binds exactly two values so callers can bind unconditionally.
pub(crate) fn longitude_clause(range: &LongitudeRange) -> (&'static str, f64, f64) {
    match *range {
        LongitudeRange::All => ("(? IS NOT NULL AND ? IS NOT NULL)", 0.0, 0.0),
        LongitudeRange::Span { min, max } => ("longitude BETWEEN ? AND ?", min, max),
        LongitudeRange::Wrapped { east_of, west_of } => {
            ("(longitude >= ? OR longitude <= ?)", east_of, west_of)
        }
    }
}

pub(crate) fn entrance_from_row(row: &SqliteRow) -> Result<Entrance> {
    let latitude: f64 = row.try_get("latitude")?;
    let longitude: f64 = row.try_get("longitude")?;

    Ok(Entrance {
        id: EntranceId(row.try_get("id")?),
        location: GeoPoint { latitude, longitude },
        venue_ref: row.try_get("venue_ref")?,
        created_at: timestamp_from_row(row.try_get("created_at_us")?, "created_at_us")?,
    })
}
