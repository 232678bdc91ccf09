//! Core domain types for the observation pipeline
//!
//! - [`Entrance`]: a physical access point, identified independently of its venue
//! - [`Observation`]: one immutable, append-only submission for one entrance
//! - [`AccessibilityRecord`]: derived best estimate, recomputed from observations

use accessmap_common::GeoPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::vocabulary::{Attribute, AttributeSet, AttributeValue};

/// Entrance identifier (monotonically increasing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntranceId(pub i64);

impl fmt::Display for EntranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observation identifier (monotonically increasing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(pub i64);

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single physical access point to a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrance {
    pub id: EntranceId,
    pub location: GeoPoint,
    /// Opaque reference to the owning venue (place metadata lives elsewhere)
    pub venue_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An immutable user observation of one entrance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub entrance_id: EntranceId,
    pub submitted_at: DateTime<Utc>,
    /// Content-addressed image reference (`sha256:<hex>`)
    pub raw_image_ref: String,
    pub attributes: AttributeSet,
    pub source_user_ref: String,
}

/// Observation fields known before the row is appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub submitted_at: DateTime<Utc>,
    pub raw_image_ref: String,
    pub attributes: AttributeSet,
    pub source_user_ref: String,
}

impl NewObservation {
    pub fn into_observation(self, id: ObservationId, entrance_id: EntranceId) -> Observation {
        Observation {
            id,
            entrance_id,
            submitted_at: self.submitted_at,
            raw_image_ref: self.raw_image_ref,
            attributes: self.attributes,
            source_user_ref: self.source_user_ref,
        }
    }
}

/// One aggregated attribute of an [`AccessibilityRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedAttribute {
    pub value: AttributeValue,
    /// Reported confidence (0.0-1.0)
    pub confidence: f64,
    /// Submission time of the newest observation behind this value
    pub last_updated: DateTime<Utc>,
    /// Non-discarded observations with positive weight that took part
    pub supporting_observation_count: usize,
}

/// Current best-estimate accessibility attributes for one entrance
///
/// Derived purely from the entrance's observation history and the evaluation
/// instant `computed_at`; never edited by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityRecord {
    pub entrance_id: EntranceId,
    pub attributes: BTreeMap<Attribute, AggregatedAttribute>,
    /// Observations considered (including ones that contributed nothing)
    pub observation_count: usize,
    /// Evaluation instant used for recency decay
    pub computed_at: DateTime<Utc>,
}

impl AccessibilityRecord {
    pub fn get(&self, attribute: Attribute) -> Option<&AggregatedAttribute> {
        self.attributes.get(&attribute)
    }

    /// True when at least one attribute is backed by a supporting observation
    pub fn has_support(&self) -> bool {
        self.attributes
            .values()
            .any(|a| a.supporting_observation_count > 0)
    }
}
