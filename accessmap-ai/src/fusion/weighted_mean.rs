// Weighted mean for continuous attributes
//
// mean = Σ w·x / Σ w
// base = Σ w² / Σ w  (confidence-weighted mean of the input weights)
// cv   = weighted std / |mean|
// confidence = max(0, base × (1 - cv))

use chrono::{DateTime, Utc};

use super::{degenerate, Contribution};
use crate::types::AggregatedAttribute;
use crate::vocabulary::{Attribute, AttributeValue};

/// Means closer to zero than this are treated as zero when computing cv
const ZERO_MEAN_EPSILON: f64 = 1e-9;

/// Combine a continuous attribute
///
/// `contributions` must be sorted newest first. Returns `None` only for an
/// empty slice.
pub fn combine(attribute: Attribute, contributions: &[Contribution]) -> Option<AggregatedAttribute> {
    let inputs: Vec<(f64, f64, DateTime<Utc>)> = contributions
        .iter()
        .filter(|c| c.weight > 0.0)
        .filter_map(|c| c.value.as_measure().map(|x| (x, c.weight, c.submitted_at)))
        .collect();

    let total: f64 = inputs.iter().map(|(_, w, _)| w).sum();
    if inputs.is_empty() || total <= 0.0 {
        return degenerate(contributions);
    }

    let mean = inputs.iter().map(|(x, w, _)| w * x).sum::<f64>() / total;
    let variance = inputs.iter().map(|(x, w, _)| w * (x - mean).powi(2)).sum::<f64>() / total;
    let std_dev = variance.max(0.0).sqrt();

    let cv = if std_dev == 0.0 {
        0.0
    } else if mean.abs() < ZERO_MEAN_EPSILON {
        1.0
    } else {
        std_dev / mean.abs()
    };

    let base = inputs.iter().map(|(_, w, _)| w * w).sum::<f64>() / total;
    let confidence = (base * (1.0 - cv)).clamp(0.0, 1.0);

    let value = if attribute == Attribute::StepCount {
        mean.round()
    } else {
        mean
    };

    let last_updated = inputs.iter().map(|(_, _, at)| *at).max()?;

    Some(AggregatedAttribute {
        value: AttributeValue::Measure(value),
        confidence,
        last_updated,
        supporting_observation_count: inputs.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObservationId;

    fn measure(id: i64, x: f64, weight: f64) -> Contribution {
        Contribution {
            observation_id: ObservationId(id),
            submitted_at: DateTime::from_timestamp(1_780_000_000 + id, 0).unwrap(),
            value: AttributeValue::Measure(x),
            confidence: weight,
            weight,
            fresh: true,
        }
    }

    #[test]
    fn test_agreeing_measurements() {
        let inputs = vec![measure(2, 90.0, 0.8), measure(1, 90.0, 0.6)];
        let result = combine(Attribute::DoorWidthCm, &inputs).unwrap();

        assert_eq!(result.value, AttributeValue::Measure(90.0));
        // cv = 0, confidence = (0.64 + 0.36) / 1.4
        assert!((result.confidence - 1.0 / 1.4).abs() < 1e-12);
        assert_eq!(result.supporting_observation_count, 2);
    }

    #[test]
    fn test_weighted_mean_value() {
        let inputs = vec![measure(2, 100.0, 0.75), measure(1, 80.0, 0.25)];
        let result = combine(Attribute::DoorWidthCm, &inputs).unwrap();
        let mean = result.value.as_measure().unwrap();
        assert!((mean - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_disagreement_lowers_confidence() {
        let agree = combine(Attribute::DoorWidthCm, &[measure(2, 90.0, 0.8), measure(1, 90.0, 0.8)]).unwrap();
        let disagree = combine(Attribute::DoorWidthCm, &[measure(2, 60.0, 0.8), measure(1, 120.0, 0.8)]).unwrap();
        assert!(disagree.confidence < agree.confidence);
        assert!(disagree.confidence >= 0.0);
    }

    #[test]
    fn test_extreme_disagreement_floors_at_zero() {
        // cv = 12 / 4 = 3
        let result = combine(Attribute::StepCount, &[measure(2, 0.0, 0.9), measure(1, 40.0, 0.1)]).unwrap();
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.value, AttributeValue::Measure(4.0));
    }

    #[test]
    fn test_step_count_rounds() {
        let result = combine(Attribute::StepCount, &[measure(2, 2.0, 0.5), measure(1, 3.0, 0.5)]).unwrap();
        assert_eq!(result.value, AttributeValue::Measure(3.0));
    }

    #[test]
    fn test_all_zero_weight_is_degenerate() {
        let result = combine(Attribute::RampSlopeDeg, &[measure(5, 3.0, 0.0), measure(4, 7.0, 0.0)]).unwrap();
        assert_eq!(result.value, AttributeValue::Measure(3.0));
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.supporting_observation_count, 0);
    }
}
