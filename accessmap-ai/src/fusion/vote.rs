// Weighted vote for enumerated attributes
//
// winner  = value with the largest summed weight (exact ties → most recent voter)
// share   = winner weight / total weight
// strength = 1 - Π(1 - w_i) over the winner's supporters (noisy-OR)
// confidence = share × strength

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{degenerate, Contribution};
use crate::types::{AggregatedAttribute, ObservationId};
use crate::vocabulary::{AttributeValue, VoteKey};

#[derive(Debug, Default)]
struct Tally {
    weight: f64,
    /// Product of (1 - w_i) over supporters
    disbelief: f64,
    newest: Option<(DateTime<Utc>, ObservationId)>,
}

/// Decide an enumerated attribute
///
/// `contributions` must be sorted newest first. Returns `None` only for an
/// empty slice.
pub fn decide(contributions: &[Contribution]) -> Option<AggregatedAttribute> {
    let mut tallies: BTreeMap<VoteKey, Tally> = BTreeMap::new();
    let mut total = 0.0;
    let mut voters = 0usize;
    let mut last_updated: Option<DateTime<Utc>> = None;

    for contribution in contributions {
        let Some(key) = contribution.value.vote_key() else {
            continue;
        };
        if contribution.weight <= 0.0 {
            continue;
        }

        let tally = tallies.entry(key).or_insert_with(|| Tally {
            disbelief: 1.0,
            ..Default::default()
        });
        tally.weight += contribution.weight;
        tally.disbelief *= 1.0 - contribution.weight.min(1.0);
        let recency = (contribution.submitted_at, contribution.observation_id);
        if tally.newest.map_or(true, |newest| recency > newest) {
            tally.newest = Some(recency);
        }

        total += contribution.weight;
        voters += 1;
        if last_updated.map_or(true, |t| contribution.submitted_at > t) {
            last_updated = Some(contribution.submitted_at);
        }
    }

    if voters == 0 || total <= 0.0 {
        return degenerate(contributions);
    }

    let (winner, tally) = tallies.iter().reduce(|best, candidate| {
        let (_, best_tally) = best;
        let (_, cand_tally) = candidate;
        if cand_tally.weight > best_tally.weight
            || (cand_tally.weight == best_tally.weight && cand_tally.newest > best_tally.newest)
        {
            candidate
        } else {
            best
        }
    })?;

    let share = tally.weight / total;
    let strength = 1.0 - tally.disbelief;
    let confidence = (share * strength).clamp(0.0, 1.0);

    Some(AggregatedAttribute {
        value: AttributeValue::from(*winner),
        confidence,
        last_updated: last_updated?,
        supporting_observation_count: voters,
    })
}
