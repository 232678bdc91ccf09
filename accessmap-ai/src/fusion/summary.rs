//! Accessibility summary score
//!
//! A 1-10 wheelchair accessibility score derived from an aggregated record,
//! plus a coarse band for display. Missing attributes never penalize.

use serde::{Deserialize, Serialize};

use crate::types::AccessibilityRecord;
use crate::vocabulary::Attribute;

/// Ramps steeper than this (1:12 gradient) lose points
pub const MAX_COMFORTABLE_RAMP_SLOPE_DEG: f64 = 4.8;
/// Doors narrower than this lose points
pub const NARROW_DOOR_CM: f64 = 80.0;
/// Doors at least this wide gain a point
pub const WIDE_DOOR_CM: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessibilityBand {
    VeryHigh,
    Good,
    Moderate,
    Low,
    VeryLow,
}

impl AccessibilityBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            9.. => AccessibilityBand::VeryHigh,
            7..=8 => AccessibilityBand::Good,
            5..=6 => AccessibilityBand::Moderate,
            3..=4 => AccessibilityBand::Low,
            _ => AccessibilityBand::VeryLow,
        }
    }

    /// Human-readable explanation of the band
    pub fn description(&self) -> &'static str {
        match self {
            AccessibilityBand::VeryHigh => "Wheelchair users can enter easily.",
            AccessibilityBand::Good => "Mostly accessible; minor inconvenience possible.",
            AccessibilityBand::Moderate => "Accessible, but some assistance may be needed.",
            AccessibilityBand::Low => "Wheelchair users may face significant difficulty.",
            AccessibilityBand::VeryLow => "Hard to enter without assistance.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibilitySummary {
    /// Score from 1 (worst) to 10 (best)
    pub score: u8,
    pub band: AccessibilityBand,
}

impl AccessibilitySummary {
    pub fn from_record(record: &AccessibilityRecord) -> Self {
        let flag = |attribute| record.get(attribute).and_then(|a| a.value.as_flag());
        let measure = |attribute| record.get(attribute).and_then(|a| a.value.as_measure());

        let mut score: i32 = 10;

        if flag(Attribute::HasStep) == Some(true) {
            score -= 5;
            if flag(Attribute::HasHandrail) == Some(true) {
                score += 1;
            }
            if measure(Attribute::StepCount).is_some_and(|n| n > 3.0) {
                score -= 1;
            }
        }

        if measure(Attribute::RampSlopeDeg).is_some_and(|deg| deg > MAX_COMFORTABLE_RAMP_SLOPE_DEG) {
            score -= 2;
        }

        if let Some(width) = measure(Attribute::DoorWidthCm) {
            if width < NARROW_DOOR_CM {
                score -= 3;
            } else if width >= WIDE_DOOR_CM {
                score += 1;
            }
        }

        let score = score.clamp(1, 10) as u8;
        Self {
            score,
            band: AccessibilityBand::from_score(score),
        }
    }
}
