//! Administrative maintenance
//!
//! Observation reassignment (the one sanctioned mutation of the log) and
//! replay of records from the log. Both recompute under the per-entrance
//! locks and swap records inside a single transaction.

use accessmap_common::events::{AccessMapEvent, EventBus};
use accessmap_common::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::entrance_locks::EntranceLocks;
use crate::db::{entrances, observations, records, StoreError};
use crate::fusion::AggregationEngine;
use crate::types::{AccessibilityRecord, EntranceId, ObservationId};
use crate::utils::retry_write;

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<accessmap_common::Error> for MaintenanceError {
    fn from(err: accessmap_common::Error) -> Self {
        MaintenanceError::Store(err.into())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReassignmentOutcome {
    pub observation_id: ObservationId,
    pub from_entrance_id: EntranceId,
    pub to_entrance_id: EntranceId,
    /// None when the source entrance has no observations left
    pub source_record: Option<AccessibilityRecord>,
    pub target_record: AccessibilityRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecomputeSummary {
    pub entrances: usize,
    pub records_written: usize,
    pub records_removed: usize,
    pub as_of: DateTime<Utc>,
}

pub struct MaintenanceService {
    db: SqlitePool,
    locks: EntranceLocks,
    engine: AggregationEngine,
    event_bus: EventBus,
    store_retry_backoff: Duration,
}

impl MaintenanceService {
    pub fn new(
        db: SqlitePool,
        locks: EntranceLocks,
        engine: AggregationEngine,
        event_bus: EventBus,
        store_retry_backoff: Duration,
    ) -> Self {
        Self {
            db,
            locks,
            engine,
            event_bus,
            store_retry_backoff,
        }
    }

    /// Move one observation to another entrance and recompute both
    pub async fn reassign_observation(
        &self,
        observation_id: ObservationId,
        target: EntranceId,
        reason: Option<&str>,
    ) -> std::result::Result<ReassignmentOutcome, MaintenanceError> {
        if entrances::get(&self.db, target).await?.is_none() {
            return Err(MaintenanceError::NotFound(format!("entrance {}", target)));
        }
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        // The observation may move while we wait for the locks; only its
        // current entrance's lock pins it, so re-check once held.
        let (source, outcome) = loop {
            let source = self.current_entrance(observation_id).await?;
            if source == target {
                return Err(MaintenanceError::InvalidRequest(format!(
                    "observation {} already belongs to entrance {}",
                    observation_id, target
                )));
            }

            let _guards = self.locks.acquire_pair(source, target).await;
            if self.current_entrance(observation_id).await? != source {
                debug!(observation_id = %observation_id, from_entrance_id = %source, "Observation moved while waiting; retrying");
                continue;
            }

            let outcome = retry_write("reassign observation", self.store_retry_backoff, || {
                self.commit_reassignment(observation_id, source, target, reason)
            })
            .await?;
            break (source, outcome);
        };

        info!(
            observation_id = %observation_id,
            from_entrance_id = %source,
            to_entrance_id = %target,
            source_removed = outcome.source_record.is_none(),
            "Observation reassigned"
        );

        let now = accessmap_common::time::now();
        self.event_bus.emit_lossy(AccessMapEvent::ObservationReassigned {
            observation_id: observation_id.0,
            from_entrance_id: source.0,
            to_entrance_id: target.0,
            timestamp: now,
        });
        for record in outcome.source_record.iter().chain(std::iter::once(&outcome.target_record)) {
            self.emit_updated(record);
        }

        Ok(outcome)
    }

    async fn current_entrance(&self, observation_id: ObservationId) -> std::result::Result<EntranceId, MaintenanceError> {
        observations::get(&self.db, observation_id)
            .await?
            .map(|o| o.entrance_id)
            .ok_or_else(|| MaintenanceError::NotFound(format!("observation {}", observation_id)))
    }

    async fn commit_reassignment(
        &self,
        observation_id: ObservationId,
        source: EntranceId,
        target: EntranceId,
        reason: Option<&str>,
    ) -> Result<ReassignmentOutcome> {
        let now = accessmap_common::time::now();
        let mut tx = self.db.begin().await?;

        observations::move_to_entrance(&mut *tx, observation_id, source, target).await?;
        observations::record_reassignment(&mut *tx, observation_id, source, target, reason, now).await?;

        let source_record = self.swap_record(&mut tx, source, now).await?;
        let target_record = self
            .swap_record(&mut tx, target, now)
            .await?
            .ok_or_else(|| accessmap_common::Error::Internal(format!("entrance {} has no history after reassignment", target)))?;

        tx.commit().await?;

        Ok(ReassignmentOutcome {
            observation_id,
            from_entrance_id: source,
            to_entrance_id: target,
            source_record,
            target_record,
        })
    }

    /// Rebuild one entrance's record as of `as_of`
    ///
    /// Returns `None` (and removes any stored record) when the entrance has
    /// no observations.
    pub async fn recompute_entrance(
        &self,
        entrance_id: EntranceId,
        as_of: DateTime<Utc>,
    ) -> std::result::Result<Option<AccessibilityRecord>, MaintenanceError> {
        if entrances::get(&self.db, entrance_id).await?.is_none() {
            return Err(MaintenanceError::NotFound(format!("entrance {}", entrance_id)));
        }

        let as_of = accessmap_common::time::truncate_to_micros(as_of);
        let _guard = self.locks.acquire(entrance_id).await;
        let record = retry_write("recompute entrance", self.store_retry_backoff, || async {
            let mut tx = self.db.begin().await?;
            let record = self.swap_record(&mut tx, entrance_id, as_of).await?;
            tx.commit().await?;
            Ok::<_, accessmap_common::Error>(record)
        })
        .await?;

        if let Some(record) = &record {
            self.emit_updated(record);
        }
        Ok(record)
    }

    /// Replay the whole log as of `as_of`
    pub async fn recompute_all(&self, as_of: DateTime<Utc>) -> std::result::Result<RecomputeSummary, MaintenanceError> {
        let as_of = accessmap_common::time::truncate_to_micros(as_of);
        let ids = entrances::list_ids(&self.db).await?;
        let mut summary = RecomputeSummary {
            entrances: ids.len(),
            records_written: 0,
            records_removed: 0,
            as_of,
        };

        for id in ids {
            match self.recompute_entrance(id, as_of).await? {
                Some(_) => summary.records_written += 1,
                None => summary.records_removed += 1,
            }
        }

        info!(
            entrances = summary.entrances,
            records_written = summary.records_written,
            records_removed = summary.records_removed,
            as_of = %as_of,
            "Recomputed all records"
        );
        Ok(summary)
    }

    /// Recompute and store (or remove) one record inside `tx`
    async fn swap_record(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entrance_id: EntranceId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<AccessibilityRecord>> {
        let history = observations::list_by_entrance(&mut **tx, entrance_id).await?;
        if history.is_empty() {
            let removed = records::delete(&mut **tx, entrance_id).await?;
            debug!(entrance_id = %entrance_id, removed, "Entrance has no observations");
            return Ok(None);
        }

        let record = self.engine.aggregate(entrance_id, &history, as_of);
        records::upsert(&mut **tx, &record).await?;
        Ok(Some(record))
    }

    fn emit_updated(&self, record: &AccessibilityRecord) {
        self.event_bus.emit_lossy(AccessMapEvent::RecordUpdated {
            entrance_id: record.entrance_id.0,
            observation_count: record.observation_count,
            attribute_count: record.attributes.len(),
            computed_at: record.computed_at,
            timestamp: accessmap_common::time::now(),
        });
    }
}
