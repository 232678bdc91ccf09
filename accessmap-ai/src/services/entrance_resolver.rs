//! Entrance Resolver
//!
//! Maps a submission's location to an existing Entrance or decides that a new
//! one is needed. Nearest candidate within the proximity threshold wins
//! (great-circle distance, lowest id on exact ties). A venue hint narrows the
//! candidates to that venue when any in-threshold entrance carries it.
//!
//! Finding "no match" and creating the new entrance must be atomic, so callers
//! hold the guard from [`EntranceResolver::lock`] until the creating
//! transaction commits.

use accessmap_common::geo::GeoError;
use accessmap_common::{GeoPoint, Result};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::db::entrances;
use crate::types::Entrance;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("Invalid location: {0}")]
    InvalidLocation(#[from] GeoError),
}

/// Validate raw coordinates
pub fn validate_location(latitude: f64, longitude: f64) -> std::result::Result<GeoPoint, ResolutionError> {
    Ok(GeoPoint::new(latitude, longitude)?)
}

/// Pick the entrance a location resolves to, if any
///
/// Pure and deterministic: the result depends only on the inputs, never on
/// candidate order.
pub fn select_entrance<'a>(
    candidates: &'a [Entrance],
    location: &GeoPoint,
    threshold_m: f64,
    venue_hint: Option<&str>,
) -> Option<(&'a Entrance, f64)> {
    let in_range: Vec<(&Entrance, f64)> = candidates
        .iter()
        .map(|e| (e, e.location.distance_m(location)))
        .filter(|(_, d)| *d <= threshold_m)
        .collect();

    let same_venue: Vec<(&Entrance, f64)> = match venue_hint {
        Some(hint) => in_range
            .iter()
            .copied()
            .filter(|(e, _)| e.venue_ref.as_deref() == Some(hint))
            .collect(),
        None => Vec::new(),
    };

    let pool = if same_venue.is_empty() { in_range } else { same_venue };

    pool.into_iter().min_by(|(a, da), (b, db)| {
        da.partial_cmp(db).unwrap_or(Ordering::Equal).then(a.id.cmp(&b.id))
    })
}

/// Database-backed resolver
#[derive(Clone)]
pub struct EntranceResolver {
    threshold_m: f64,
    creation_lock: Arc<Mutex<()>>,
}

impl EntranceResolver {
    pub fn new(threshold_m: f64) -> Self {
        Self {
            threshold_m,
            creation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// Serialize resolution; hold the guard until a newly created entrance commits
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.creation_lock.clone().lock_owned().await
    }

    /// Resolve against committed entrances
    ///
    /// Returns the matched entrance and its distance, or `None` when a new
    /// entrance should be created at `location`.
    pub async fn find(
        &self,
        db: &SqlitePool,
        location: &GeoPoint,
        venue_hint: Option<&str>,
    ) -> Result<Option<(Entrance, f64)>> {
        let candidates = entrances::list_within(db, &location.bounding_box(self.threshold_m)).await?;
        let selected = select_entrance(&candidates, location, self.threshold_m, venue_hint)
            .map(|(entrance, distance)| (entrance.clone(), distance));

        match &selected {
            Some((entrance, distance)) => debug!(
                entrance_id = %entrance.id,
                distance_m = distance,
                candidates = candidates.len(),
                "Resolved to existing entrance"
            ),
            None => debug!(candidates = candidates.len(), "No entrance within threshold"),
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntranceId;
    use chrono::Utc;

    fn origin() -> GeoPoint {
        GeoPoint::new(37.5665, 126.9780).unwrap()
    }

    fn entrance(id: i64, location: GeoPoint, venue: Option<&str>) -> Entrance {
        Entrance {
            id: EntranceId(id),
            location,
            venue_ref: venue.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_identical_coordinates_resolve_to_same_entrance() {
        let candidates = vec![entrance(1, origin(), None)];
        let (found, distance) = select_entrance(&candidates, &origin(), 20.0, None).unwrap();
        assert_eq!(found.id, EntranceId(1));
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn test_beyond_threshold_never_matches() {
        let candidates = vec![entrance(1, origin().offset(45.0, 25.0), None)];
        assert!(select_entrance(&candidates, &origin(), 20.0, None).is_none());
    }

    #[test]
    fn test_nearest_wins() {
        let candidates = vec![
            entrance(1, origin().offset(0.0, 15.0), None),
            entrance(2, origin().offset(180.0, 5.0), None),
        ];
        let (found, _) = select_entrance(&candidates, &origin(), 20.0, None).unwrap();
        assert_eq!(found.id, EntranceId(2));
    }

    #[test]
    fn test_exact_tie_goes_to_lowest_id() {
        let same_spot = origin().offset(90.0, 10.0);
        let candidates = vec![entrance(9, same_spot, None), entrance(4, same_spot, None)];
        let (found, _) = select_entrance(&candidates, &origin(), 20.0, None).unwrap();
        assert_eq!(found.id, EntranceId(4));
    }

    #[test]
    fn test_venue_hint_narrows_candidates() {
        let candidates = vec![
            entrance(1, origin().offset(0.0, 2.0), Some("cafe")),
            entrance(2, origin().offset(0.0, 12.0), Some("library")),
        ];

        let (found, _) = select_entrance(&candidates, &origin(), 20.0, Some("library")).unwrap();
        assert_eq!(found.id, EntranceId(2));

        // Unknown venue falls back to plain proximity
        let (found, _) = select_entrance(&candidates, &origin(), 20.0, Some("museum")).unwrap();
        assert_eq!(found.id, EntranceId(1));
    }

    #[test]
    fn test_validate_location() {
        assert!(validate_location(37.0, 127.0).is_ok());
        assert!(matches!(
            validate_location(91.0, 0.0),
            Err(ResolutionError::InvalidLocation(GeoError::InvalidLatitude(_)))
        ));
        assert!(validate_location(0.0, f64::NAN).is_err());
    }
}
