// Aggregation Engine - observation history → AccessibilityRecord
//
// Pure function of (history, as_of, policy). Every observation contributes
// weight = confidence × recency decay × vocabulary version weight.
// Enumerated attributes are decided by weighted vote (vote.rs), continuous
// attributes by weighted mean with a disagreement penalty (weighted_mean.rs).

pub mod summary;
pub mod vote;
pub mod weighted_mean;

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::types::{AccessibilityRecord, AggregatedAttribute, EntranceId, Observation, ObservationId};
use crate::vocabulary::{Attribute, AttributeKind, AttributeValue, VocabularyVersion};

pub use summary::{AccessibilityBand, AccessibilitySummary};

/// Weighting rules applied by the [`AggregationEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPolicy {
    /// Observations older than this are stale
    pub staleness_window: Duration,
    /// Multiplier for supported, non-current vocabulary versions
    pub retired_version_weight: f64,
    /// Versions below this are ignored as evidence
    pub min_supported_version: VocabularyVersion,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl AggregationPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            staleness_window: config.staleness_window(),
            retired_version_weight: config.retired_version_weight,
            min_supported_version: VocabularyVersion(config.min_supported_vocabulary_version),
        }
    }

    /// Weight multiplier for a vocabulary version, `None` when rejected
    pub fn version_weight(&self, version: VocabularyVersion) -> Option<f64> {
        if version < self.min_supported_version || version > VocabularyVersion::CURRENT {
            None
        } else if version.is_current() {
            Some(1.0)
        } else {
            Some(self.retired_version_weight)
        }
    }

    /// Exponential recency decay, half-life = staleness window / 2
    ///
    /// Future-dated observations (negative age) count as age 0.
    pub fn decay(&self, age: Duration) -> f64 {
        let age_us = age.num_microseconds().unwrap_or(i64::MAX).max(0) as f64;
        let half_life_us = self.half_life_us();
        if half_life_us <= 0.0 {
            return if age_us == 0.0 { 1.0 } else { 0.0 };
        }
        0.5_f64.powf(age_us / half_life_us)
    }

    pub fn is_fresh(&self, age: Duration) -> bool {
        age <= self.staleness_window
    }

    fn half_life_us(&self) -> f64 {
        self.staleness_window.num_microseconds().unwrap_or(i64::MAX) as f64 / 2.0
    }
}

/// One observation's weighted vote for one attribute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub observation_id: ObservationId,
    pub submitted_at: DateTime<Utc>,
    pub value: AttributeValue,
    /// Confidence as reported by the extractor
    pub confidence: f64,
    /// Effective weight after decay and version weighting
    pub weight: f64,
    pub fresh: bool,
}

impl Contribution {
    /// Ordering key: newest first, higher id first on equal timestamps
    fn recency_key(&self) -> (DateTime<Utc>, ObservationId) {
        (self.submitted_at, self.observation_id)
    }
}

/// Computes accessibility records from observation history
#[derive(Debug, Clone, Default)]
pub struct AggregationEngine {
    policy: AggregationPolicy,
}

impl AggregationEngine {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    /// Recompute the record for one entrance
    ///
    /// `history` may be in any order; `as_of` is the instant recency decay is
    /// measured from. Never fails: malformed or unsupported evidence is skipped.
    pub fn aggregate(
        &self,
        entrance_id: EntranceId,
        history: &[Observation],
        as_of: DateTime<Utc>,
    ) -> AccessibilityRecord {
        let mut by_attribute = self.collect_contributions(history, as_of);

        let mut attributes = BTreeMap::new();
        for (attribute, contributions) in by_attribute.iter_mut() {
            contributions.sort_by(|a, b| b.recency_key().cmp(&a.recency_key()));

            // Stale evidence only counts when nothing fresher exists
            if contributions.iter().any(|c| c.fresh) {
                contributions.retain(|c| c.fresh);
            }

            let aggregated = match attribute.kind() {
                AttributeKind::Enumerated => vote::decide(contributions),
                AttributeKind::Continuous => weighted_mean::combine(*attribute, contributions),
            };

            if let Some(aggregated) = aggregated {
                attributes.insert(*attribute, aggregated);
            }
        }

        debug!(
            entrance_id = %entrance_id,
            observations = history.len(),
            attributes = attributes.len(),
            "Aggregated accessibility record"
        );

        AccessibilityRecord {
            entrance_id,
            attributes,
            observation_count: history.len(),
            computed_at: as_of,
        }
    }

    fn collect_contributions(
        &self,
        history: &[Observation],
        as_of: DateTime<Utc>,
    ) -> BTreeMap<Attribute, Vec<Contribution>> {
        let mut by_attribute: BTreeMap<Attribute, Vec<Contribution>> = BTreeMap::new();

        for observation in history {
            let Some(version_weight) = self.policy.version_weight(observation.attributes.version) else {
                debug!(
                    observation_id = %observation.id,
                    version = %observation.attributes.version,
                    "Ignoring observation with unsupported vocabulary version"
                );
                continue;
            };

            let age = as_of.signed_duration_since(observation.submitted_at);
            let decay = self.policy.decay(age);
            let fresh = self.policy.is_fresh(age);

            for (attribute, scored) in &observation.attributes.values {
                if let Err(e) = attribute.validate(&scored.value) {
                    warn!(observation_id = %observation.id, "Skipping stored value: {}", e);
                    continue;
                }

                let confidence = if scored.confidence.is_finite() {
                    scored.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                };

                by_attribute.entry(*attribute).or_default().push(Contribution {
                    observation_id: observation.id,
                    submitted_at: observation.submitted_at,
                    value: scored.value,
                    confidence,
                    weight: confidence * decay * version_weight,
                    fresh,
                });
            }
        }

        by_attribute
    }
}

/// Result for inputs that carry no weight at all
///
/// `contributions` must be sorted newest first and non-empty.
fn degenerate(contributions: &[Contribution]) -> Option<AggregatedAttribute> {
    let newest = contributions.first()?;
    Some(AggregatedAttribute {
        value: newest.value,
        confidence: 0.0,
        last_updated: newest.submitted_at,
        supporting_observation_count: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::AttributeSet;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn observation(id: i64, at: DateTime<Utc>, set: AttributeSet) -> Observation {
        Observation {
            id: ObservationId(id),
            entrance_id: EntranceId(1),
            submitted_at: at,
            raw_image_ref: format!("sha256:{:064x}", id),
            attributes: set,
            source_user_ref: "user".to_string(),
        }
    }

    fn has_step(value: bool, confidence: f64) -> AttributeSet {
        AttributeSet::new(VocabularyVersion::CURRENT)
            .with(Attribute::HasStep, AttributeValue::Flag(value), confidence)
            .unwrap()
    }

    #[test]
    fn test_decay_half_life() {
        let policy = AggregationPolicy::default();
        assert_eq!(policy.decay(Duration::zero()), 1.0);
        assert!((policy.decay(Duration::days(90)) - 0.5).abs() < 1e-12);
        assert!((policy.decay(Duration::days(180)) - 0.25).abs() < 1e-12);
        // Future-dated evidence is not boosted
        assert_eq!(policy.decay(Duration::days(-3)), 1.0);
    }

    #[test]
    fn test_version_weight() {
        let policy = AggregationPolicy::default();
        assert_eq!(policy.version_weight(VocabularyVersion::CURRENT), Some(1.0));
        assert_eq!(policy.version_weight(VocabularyVersion::V1), Some(0.5));
        assert_eq!(policy.version_weight(VocabularyVersion(0)), None);
        assert_eq!(policy.version_weight(VocabularyVersion(99)), None);

        let strict = AggregationPolicy {
            min_supported_version: VocabularyVersion::CURRENT,
            ..Default::default()
        };
        assert_eq!(strict.version_weight(VocabularyVersion::V1), None);
    }

    #[test]
    fn test_empty_history_yields_empty_record() {
        let engine = AggregationEngine::default();
        let record = engine.aggregate(EntranceId(7), &[], t0());
        assert!(record.attributes.is_empty());
        assert_eq!(record.observation_count, 0);
        assert!(!record.has_support());
    }

    #[test]
    fn test_stale_evidence_dropped_when_fresh_exists() {
        let engine = AggregationEngine::default();
        let history = vec![
            observation(1, t0() - Duration::days(400), has_step(true, 1.0)),
            observation(2, t0() - Duration::days(1), has_step(false, 0.3)),
        ];

        let record = engine.aggregate(EntranceId(1), &history, t0());
        let attr = record.get(Attribute::HasStep).unwrap();
        assert_eq!(attr.value, AttributeValue::Flag(false));
        assert_eq!(attr.supporting_observation_count, 1);
        assert_eq!(record.observation_count, 2);
    }

    #[test]
    fn test_first_fresh_vote_replaces_stale_consensus() {
        let engine = AggregationEngine::default();
        let stale = vec![
            observation(1, t0() - Duration::days(400), has_step(true, 1.0)),
            observation(2, t0() - Duration::days(401), has_step(true, 1.0)),
        ];
        let before = engine.aggregate(EntranceId(1), &stale, t0());
        let before = before.get(Attribute::HasStep).unwrap().confidence;

        // A weak fresh vote that agrees still discards the stale pair
        let mut history = stale;
        history.push(observation(3, t0(), has_step(true, 0.05)));
        let record = engine.aggregate(EntranceId(1), &history, t0());
        let attr = record.get(Attribute::HasStep).unwrap();

        assert_eq!(attr.value, AttributeValue::Flag(true));
        assert_eq!(attr.supporting_observation_count, 1);
        assert!((attr.confidence - 0.05).abs() < 1e-9);
        assert!(attr.confidence < before);
    }

    #[test]
    fn test_rejected_version_contributes_nothing() {
        let engine = AggregationEngine::new(AggregationPolicy {
            min_supported_version: VocabularyVersion::CURRENT,
            ..Default::default()
        });
        let v1 = AttributeSet::new(VocabularyVersion::V1)
            .with(Attribute::HasStep, AttributeValue::Flag(true), 0.9)
            .unwrap();
        let history = vec![observation(1, t0(), v1)];

        let record = engine.aggregate(EntranceId(1), &history, t0());
        assert!(record.get(Attribute::HasStep).is_none());
        assert_eq!(record.observation_count, 1);
    }

    #[test]
    fn test_history_order_does_not_matter() {
        let engine = AggregationEngine::default();
        let a = observation(1, t0() - Duration::days(2), has_step(true, 0.7));
        let b = observation(2, t0() - Duration::days(1), has_step(false, 0.6));
        let c = observation(3, t0(), has_step(true, 0.2));

        let forward = engine.aggregate(EntranceId(1), &[a.clone(), b.clone(), c.clone()], t0());
        let reversed = engine.aggregate(EntranceId(1), &[c, b, a], t0());
        assert_eq!(forward, reversed);
    }
}
