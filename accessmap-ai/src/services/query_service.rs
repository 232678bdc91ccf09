//! Query Service
//!
//! Read side of the pipeline: "what is accessible near here". Reads go
//! straight to the pool, so they see the last committed record of every
//! entrance and never wait on an in-flight recomputation.
//!
//! Results are ordered by (distance, entrance id) and paginated with an
//! opaque cursor holding the last returned pair.

use accessmap_common::geo::GeoError;
use accessmap_common::GeoPoint;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::db::{entrances, observations, records};
use crate::fusion::AccessibilitySummary;
use crate::types::{AccessibilityRecord, Entrance, EntranceId, Observation};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid location: {0}")]
    InvalidLocation(#[from] GeoError),

    #[error("Radius must be within (0, {max}] meters, got {radius}")]
    InvalidRadius { radius: f64, max: f64 },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid page size: {0}")]
    InvalidLimit(usize),

    #[error("Entrance not found: {0}")]
    NotFound(EntranceId),

    #[error(transparent)]
    Store(#[from] accessmap_common::Error),
}

/// Which aggregated attributes are reliable enough to show
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityPolicy {
    pub min_supporting_observations: usize,
    pub min_confidence: f64,
}

impl Default for VisibilityPolicy {
    fn default() -> Self {
        Self {
            min_supporting_observations: 1,
            min_confidence: 0.0,
        }
    }
}

impl VisibilityPolicy {
    /// Copy of `record` without the attributes that fail the policy
    pub fn apply(&self, record: &AccessibilityRecord) -> AccessibilityRecord {
        let min_support = self.min_supporting_observations.max(1);
        let attributes = record
            .attributes
            .iter()
            .filter(|(_, a)| a.supporting_observation_count >= min_support && a.confidence >= self.min_confidence)
            .map(|(k, a)| (*k, a.clone()))
            .collect();

        AccessibilityRecord {
            attributes,
            ..record.clone()
        }
    }
}

/// Position in a result sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Cursor {
    /// Distance of the last returned entrance
    d: f64,
    /// Id of the last returned entrance
    id: i64,
}

impl Cursor {
    fn encode(&self) -> String {
        // Serializing two plain numbers cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    fn decode(token: &str) -> Result<Self, QueryError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| QueryError::InvalidCursor(e.to_string()))?;
        let cursor: Cursor = serde_json::from_slice(&bytes).map_err(|e| QueryError::InvalidCursor(e.to_string()))?;
        if !cursor.d.is_finite() || cursor.d < 0.0 {
            return Err(QueryError::InvalidCursor("distance out of range".to_string()));
        }
        Ok(cursor)
    }

    fn is_before(&self, distance: f64, id: EntranceId) -> bool {
        match self.d.partial_cmp(&distance) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => self.id < id.0,
            _ => false,
        }
    }
}

/// One entry of a near-me page
#[derive(Debug, Clone, Serialize)]
pub struct NearbyEntrance {
    pub entrance: Entrance,
    pub distance_m: f64,
    /// Record after the visibility policy
    pub record: AccessibilityRecord,
    pub summary: AccessibilitySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyPage {
    pub items: Vec<NearbyEntrance>,
    /// Present when more results may follow
    pub next_cursor: Option<String>,
}

/// Entrance detail view
#[derive(Debug, Clone, Serialize)]
pub struct EntranceDetail {
    pub entrance: Entrance,
    pub record: Option<AccessibilityRecord>,
    pub summary: Option<AccessibilitySummary>,
}

pub struct QueryService {
    db: SqlitePool,
    policy: VisibilityPolicy,
    max_radius_m: f64,
    default_page_size: usize,
    max_page_size: usize,
}

impl QueryService {
    pub fn new(db: SqlitePool, config: &PipelineConfig) -> Self {
        Self {
            db,
            policy: VisibilityPolicy {
                min_supporting_observations: config.min_supporting_observations,
                min_confidence: config.min_confidence,
            },
            max_radius_m: config.max_query_radius_m,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    pub fn policy(&self) -> VisibilityPolicy {
        self.policy
    }

    /// Entrances within `radius_m` of `location` that have visible evidence
    ///
    /// `limit` defaults to the configured page size and is capped at the
    /// configured maximum.
    pub async fn query_near(
        &self,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<NearbyPage, QueryError> {
        let location = GeoPoint::new(latitude, longitude)?;
        if !radius_m.is_finite() || radius_m <= 0.0 || radius_m > self.max_radius_m {
            return Err(QueryError::InvalidRadius {
                radius: radius_m,
                max: self.max_radius_m,
            });
        }
        let cursor = cursor.filter(|c| !c.trim().is_empty()).map(Cursor::decode).transpose()?;
        let limit = match limit {
            Some(0) => return Err(QueryError::InvalidLimit(0)),
            Some(n) => n.min(self.max_page_size),
            None => self.default_page_size,
        };

        let rows = records::list_within(&self.db, &location.bounding_box(radius_m)).await?;

        let mut matches: Vec<NearbyEntrance> = rows
            .into_iter()
            .filter_map(|(entrance, record)| {
                let distance_m = entrance.location.distance_m(&location);
                if distance_m > radius_m {
                    return None;
                }
                if cursor.is_some_and(|c| !c.is_before(distance_m, entrance.id)) {
                    return None;
                }
                let visible = self.policy.apply(&record);
                if !visible.has_support() {
                    return None;
                }
                let summary = AccessibilitySummary::from_record(&visible);
                Some(NearbyEntrance {
                    entrance,
                    distance_m,
                    record: visible,
                    summary,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(Ordering::Equal)
                .then(a.entrance.id.cmp(&b.entrance.id))
        });

        let has_more = matches.len() > limit;
        matches.truncate(limit);

        let next_cursor = if has_more {
            matches.last().map(|last| {
                Cursor {
                    d: last.distance_m,
                    id: last.entrance.id.0,
                }
                .encode()
            })
        } else {
            None
        };

        tracing::debug!(
            latitude,
            longitude,
            radius_m,
            returned = matches.len(),
            has_more,
            "Near query"
        );

        Ok(NearbyPage {
            items: matches,
            next_cursor,
        })
    }

    /// One entrance with its (policy-filtered) record
    pub async fn entrance_detail(&self, id: EntranceId) -> Result<EntranceDetail, QueryError> {
        let entrance = entrances::get(&self.db, id).await?.ok_or(QueryError::NotFound(id))?;
        let record = records::get(&self.db, id).await?.map(|r| self.policy.apply(&r));
        let summary = record.as_ref().map(AccessibilitySummary::from_record);

        Ok(EntranceDetail {
            entrance,
            record,
            summary,
        })
    }

    /// Observation history of one entrance, oldest first
    pub async fn entrance_observations(&self, id: EntranceId) -> Result<Vec<Observation>, QueryError> {
        if entrances::get(&self.db, id).await?.is_none() {
            return Err(QueryError::NotFound(id));
        }
        Ok(observations::list_by_entrance(&self.db, id).await?)
    }
}
