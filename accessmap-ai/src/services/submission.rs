//! Observation submission pipeline
//!
//! **Flow:**
//! 1. Validate location and image payload
//! 2. Extract attributes (bounded: deadline, one retry, cancellable)
//! 3. Store the raw image (content-addressed; removed again if the
//!    commit below fails and nothing else references it)
//! 4. Resolve the entrance under the resolver lock
//! 5. One transaction: create entrance if needed, append observation,
//!    recompute and swap the accessibility record
//! 6. Publish `RecordUpdated`
//!
//! Any failure before step 5 commits leaves the observation store untouched.
//! Failures are logged to `failed_submissions` and published as
//! `SubmissionFailed`.

use accessmap_common::events::{AccessMapEvent, EventBus};
use accessmap_common::{GeoPoint, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entrance_locks::EntranceLocks;
use super::entrance_resolver::{validate_location, EntranceResolver, ResolutionError};
use super::image_store::ImageStore;
use crate::db::failures::FailedSubmission;
use crate::db::{entrances, failures, observations, records, StoreError};
use crate::extractors::{BoundedExtractor, ExtractionError, ImagePayload};
use crate::fusion::AggregationEngine;
use crate::types::{AccessibilityRecord, Entrance, EntranceId, NewObservation, ObservationId};
use crate::utils::retry_write;

/// Inbound submission
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub image: Vec<u8>,
    pub latitude: f64,
    pub longitude: f64,
    pub venue_hint: Option<String>,
    pub user_ref: String,
}

/// Outcome of a committed submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub observation_id: ObservationId,
    pub entrance_id: EntranceId,
    /// True when this submission created the entrance
    pub created_entrance: bool,
    pub record: AccessibilityRecord,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmissionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::InvalidRequest(_) => "invalid_request",
            SubmissionError::Resolution(_) => "invalid_location",
            SubmissionError::Extraction(e) => e.kind(),
            SubmissionError::Store(_) => "store_failure",
        }
    }
}

/// Where the observation goes
enum Target<'a> {
    Existing(&'a Entrance),
    New { location: GeoPoint, venue_ref: Option<&'a str> },
}

pub struct SubmissionService {
    db: SqlitePool,
    extractor: BoundedExtractor,
    resolver: EntranceResolver,
    locks: EntranceLocks,
    engine: AggregationEngine,
    images: ImageStore,
    event_bus: EventBus,
    max_image_bytes: usize,
    store_retry_backoff: Duration,
}

impl SubmissionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        extractor: BoundedExtractor,
        resolver: EntranceResolver,
        locks: EntranceLocks,
        engine: AggregationEngine,
        images: ImageStore,
        event_bus: EventBus,
        max_image_bytes: usize,
        store_retry_backoff: Duration,
    ) -> Self {
        Self {
            db,
            extractor,
            resolver,
            locks,
            engine,
            images,
            event_bus,
            max_image_bytes,
            store_retry_backoff,
        }
    }

    /// Submit one observation
    ///
    /// Cancelling `cancel` aborts an in-flight extraction; once extraction
    /// has succeeded the submission runs to completion.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<SubmissionReceipt, SubmissionError> {
        let attempted_at = accessmap_common::time::now();
        let user_ref = request.user_ref.clone();
        let location = GeoPoint::new(request.latitude, request.longitude).ok();

        match self.process(request, &cancel).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                self.report_failure(&err, attempted_at, user_ref, location).await;
                Err(err)
            }
        }
    }

    async fn process(
        &self,
        request: SubmissionRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<SubmissionReceipt, SubmissionError> {
        if request.user_ref.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("user_ref must not be empty".to_string()));
        }
        let location = validate_location(request.latitude, request.longitude)?;
        let image = ImagePayload::sniff(request.image, self.max_image_bytes)?;

        debug!(
            user_ref = %request.user_ref,
            mime = image.mime_type(),
            bytes = image.len(),
            "Extracting attributes"
        );
        let attributes = self.extractor.run(&image, cancel).await?;

        let stored = retry_write("store image", self.store_retry_backoff, || self.images.store(&image)).await?;

        let observation = NewObservation {
            submitted_at: accessmap_common::time::now(),
            raw_image_ref: stored.reference.clone(),
            attributes,
            source_user_ref: request.user_ref,
        };
        let venue_hint = request.venue_hint.as_deref().map(str::trim).filter(|h| !h.is_empty());

        let committed = match self.resolve_and_commit(location, venue_hint, &observation).await {
            Ok(committed) => committed,
            Err(err) => {
                if stored.newly_written {
                    self.discard_image(&stored.reference).await;
                }
                return Err(err);
            }
        };

        info!(
            observation_id = %committed.observation_id,
            entrance_id = %committed.entrance_id,
            created_entrance = committed.created_entrance,
            observations = committed.record.observation_count,
            "Observation recorded"
        );

        self.event_bus.emit_lossy(AccessMapEvent::RecordUpdated {
            entrance_id: committed.entrance_id.0,
            observation_count: committed.record.observation_count,
            attribute_count: committed.record.attributes.len(),
            computed_at: committed.record.computed_at,
            timestamp: accessmap_common::time::now(),
        });

        Ok(committed)
    }

    async fn resolve_and_commit(
        &self,
        location: GeoPoint,
        venue_hint: Option<&str>,
        observation: &NewObservation,
    ) -> std::result::Result<SubmissionReceipt, SubmissionError> {
        let resolver_guard = self.resolver.lock().await;
        let resolved = retry_write("resolve entrance", self.store_retry_backoff, || {
            self.resolver.find(&self.db, &location, venue_hint)
        })
        .await?;

        let committed = match resolved {
            Some((entrance, distance)) => {
                drop(resolver_guard);
                debug!(entrance_id = %entrance.id, distance_m = distance, "Appending to existing entrance");
                let _entrance_guard = self.locks.acquire(entrance.id).await;
                retry_write("append observation", self.store_retry_backoff, || {
                    self.commit(Target::Existing(&entrance), observation)
                })
                .await?
            }
            None => {
                // Resolver lock stays held so no concurrent submission can
                // create a second entrance here before this one commits
                let committed = retry_write("create entrance", self.store_retry_backoff, || {
                    self.commit(
                        Target::New {
                            location,
                            venue_ref: venue_hint,
                        },
                        observation,
                    )
                })
                .await?;
                drop(resolver_guard);
                committed
            }
        };
        Ok(committed)
    }

    /// Drop an image this submission wrote when nothing ended up referencing it
    async fn discard_image(&self, reference: &str) {
        match observations::count_by_image_ref(&self.db, reference).await {
            Ok(0) => match self.images.remove(reference).await {
                Ok(_) => debug!(reference = %reference, "Removed image of failed submission"),
                Err(e) => warn!(reference = %reference, "Failed to remove orphaned image: {}", e),
            },
            Ok(_) => {}
            Err(e) => warn!(reference = %reference, "Failed to check image references: {}", e),
        }
    }

    /// Append and recompute inside one transaction
    async fn commit(&self, target: Target<'_>, observation: &NewObservation) -> Result<SubmissionReceipt> {
        let mut tx = self.db.begin().await?;

        let (entrance_id, created_entrance) = match target {
            Target::Existing(entrance) => (entrance.id, false),
            Target::New { location, venue_ref } => {
                let entrance = entrances::insert(&mut *tx, location, venue_ref, observation.submitted_at).await?;
                (entrance.id, true)
            }
        };

        let observation_id = observations::append(&mut *tx, entrance_id, observation).await?;
        let history = observations::list_by_entrance(&mut *tx, entrance_id).await?;
        let record = self.engine.aggregate(entrance_id, &history, observation.submitted_at);
        records::upsert(&mut *tx, &record).await?;

        tx.commit().await?;

        Ok(SubmissionReceipt {
            observation_id,
            entrance_id,
            created_entrance,
            record,
        })
    }

    async fn report_failure(
        &self,
        err: &SubmissionError,
        attempted_at: chrono::DateTime<chrono::Utc>,
        user_ref: String,
        location: Option<GeoPoint>,
    ) {
        warn!(kind = err.kind(), user_ref = %user_ref, "Submission failed: {}", err);

        let failure = FailedSubmission {
            id: Uuid::new_v4(),
            attempted_at,
            user_ref,
            location,
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        };
        if let Err(e) = failures::record(&self.db, &failure).await {
            warn!("Failed to log failed submission: {}", e);
        }

        self.event_bus.emit_lossy(AccessMapEvent::SubmissionFailed {
            error_kind: failure.error_kind,
            message: failure.message,
            timestamp: accessmap_common::time::now(),
        });
    }
}
