//! Versioned attribute vocabulary
//!
//! The vocabulary is the contract between the pipeline and the external
//! image-analysis model. Every attribute has a fixed value domain, and every
//! [`AttributeSet`] carries the vocabulary version it was produced under so
//! the aggregation engine can down-weight or reject retired versions.
//!
//! | key | domain | kind | since |
//! |---|---|---|---|
//! | `has_step` | bool | enumerated | v1 |
//! | `entrance_type` | [`EntranceType`] | enumerated | v1 |
//! | `door_width_cm` | 30..=400 | continuous | v1 |
//! | `has_ramp` | bool | enumerated | v2 |
//! | `has_handrail` | bool | enumerated | v2 |
//! | `step_count` | 0..=50, integral | continuous | v2 |
//! | `ramp_slope_deg` | 0..=45 | continuous | v2 |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Vocabulary version tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VocabularyVersion(pub u16);

impl VocabularyVersion {
    /// Version produced by the current prompt/model contract
    pub const CURRENT: VocabularyVersion = VocabularyVersion(2);
    /// Oldest version the vocabulary knows about
    pub const V1: VocabularyVersion = VocabularyVersion(1);

    pub fn is_current(&self) -> bool {
        *self == Self::CURRENT
    }
}

impl fmt::Display for VocabularyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// How an attribute's observations are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Small discrete domain: weighted vote
    Enumerated,
    /// Numeric measurement: weighted mean with disagreement penalty
    Continuous,
}

/// Attribute names in the vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    HasStep,
    HasRamp,
    HasHandrail,
    EntranceType,
    StepCount,
    RampSlopeDeg,
    DoorWidthCm,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::HasStep,
        Attribute::HasRamp,
        Attribute::HasHandrail,
        Attribute::EntranceType,
        Attribute::StepCount,
        Attribute::RampSlopeDeg,
        Attribute::DoorWidthCm,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Attribute::HasStep => "has_step",
            Attribute::HasRamp => "has_ramp",
            Attribute::HasHandrail => "has_handrail",
            Attribute::EntranceType => "entrance_type",
            Attribute::StepCount => "step_count",
            Attribute::RampSlopeDeg => "ramp_slope_deg",
            Attribute::DoorWidthCm => "door_width_cm",
        }
    }

    pub fn from_key(key: &str) -> Option<Attribute> {
        Attribute::ALL.into_iter().find(|a| a.key() == key)
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::HasStep
            | Attribute::HasRamp
            | Attribute::HasHandrail
            | Attribute::EntranceType => AttributeKind::Enumerated,
            Attribute::StepCount | Attribute::RampSlopeDeg | Attribute::DoorWidthCm => {
                AttributeKind::Continuous
            }
        }
    }

    /// First vocabulary version that defines this attribute
    pub fn introduced_in(&self) -> VocabularyVersion {
        match self {
            Attribute::HasStep | Attribute::EntranceType | Attribute::DoorWidthCm => {
                VocabularyVersion::V1
            }
            _ => VocabularyVersion(2),
        }
    }

    pub fn defined_in(&self, version: VocabularyVersion) -> bool {
        self.introduced_in() <= version
    }

    /// Inclusive value range for continuous attributes
    pub fn range(&self) -> Option<(f64, f64)> {
        match self {
            Attribute::StepCount => Some((0.0, 50.0)),
            Attribute::RampSlopeDeg => Some((0.0, 45.0)),
            Attribute::DoorWidthCm => Some((30.0, 400.0)),
            _ => None,
        }
    }

    /// Check that a typed value belongs to this attribute's domain
    pub fn validate(&self, value: &AttributeValue) -> Result<(), VocabularyError> {
        match (self, value) {
            (Attribute::HasStep | Attribute::HasRamp | Attribute::HasHandrail, AttributeValue::Flag(_)) => Ok(()),
            (Attribute::EntranceType, AttributeValue::Category(_)) => Ok(()),
            (Attribute::StepCount, AttributeValue::Measure(x)) if x.fract() != 0.0 => {
                Err(VocabularyError::OutOfDomain { attribute: *self, value: x.to_string() })
            }
            (_, AttributeValue::Measure(x)) if self.kind() == AttributeKind::Continuous => {
                let (min, max) = self.range().unwrap_or((f64::MIN, f64::MAX));
                if x.is_finite() && *x >= min && *x <= max {
                    Ok(())
                } else {
                    Err(VocabularyError::OutOfDomain { attribute: *self, value: x.to_string() })
                }
            }
            _ => Err(VocabularyError::KindMismatch { attribute: *self }),
        }
    }

    /// Parse a raw JSON value from the model into this attribute's domain
    ///
    /// Returns `None` when the value does not belong to the domain.
    pub fn parse_value(&self, raw: &serde_json::Value) -> Option<AttributeValue> {
        let value = match self.kind() {
            AttributeKind::Enumerated if *self == Attribute::EntranceType => {
                EntranceType::parse(raw.as_str()?).map(AttributeValue::Category)?
            }
            AttributeKind::Enumerated => match raw {
                serde_json::Value::Bool(b) => AttributeValue::Flag(*b),
                serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" => AttributeValue::Flag(true),
                    "false" | "no" => AttributeValue::Flag(false),
                    _ => return None,
                },
                _ => return None,
            },
            AttributeKind::Continuous => AttributeValue::Measure(raw.as_f64()?),
        };

        self.validate(&value).ok().map(|_| value)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Entrance categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntranceType {
    /// Step-free, level threshold
    Level,
    /// One or more steps
    Stepped,
    /// Ramp access
    Ramped,
    /// Platform or vertical lift
    Lift,
    /// Revolving door
    Revolving,
}

impl EntranceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntranceType::Level => "level",
            EntranceType::Stepped => "stepped",
            EntranceType::Ramped => "ramped",
            EntranceType::Lift => "lift",
            EntranceType::Revolving => "revolving",
        }
    }

    pub fn parse(s: &str) -> Option<EntranceType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "level" => Some(EntranceType::Level),
            "stepped" => Some(EntranceType::Stepped),
            "ramped" => Some(EntranceType::Ramped),
            "lift" => Some(EntranceType::Lift),
            "revolving" => Some(EntranceType::Revolving),
            _ => None,
        }
    }
}

/// A typed attribute value
///
/// Serialized untagged: `true`, `"level"`, `87.5`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Category(EntranceType),
    Measure(f64),
}

impl AttributeValue {
    /// Key used for voting; `None` for continuous measurements
    pub fn vote_key(&self) -> Option<VoteKey> {
        match self {
            AttributeValue::Flag(b) => Some(VoteKey::Flag(*b)),
            AttributeValue::Category(c) => Some(VoteKey::Category(*c)),
            AttributeValue::Measure(_) => None,
        }
    }

    pub fn as_measure(&self) -> Option<f64> {
        match self {
            AttributeValue::Measure(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttributeValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

/// Totally ordered form of an enumerated value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoteKey {
    Flag(bool),
    Category(EntranceType),
}

impl From<VoteKey> for AttributeValue {
    fn from(key: VoteKey) -> Self {
        match key {
            VoteKey::Flag(b) => AttributeValue::Flag(b),
            VoteKey::Category(c) => AttributeValue::Category(c),
        }
    }
}

/// Confidence-scored value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceValue<T> {
    pub value: T,
    /// Confidence score (0.0-1.0)
    pub confidence: f64,
}

impl<T> ConfidenceValue<T> {
    /// Create new confidence value with clamped confidence (0.0-1.0); NaN becomes 0
    pub fn new(value: T, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self { value, confidence }
    }
}

/// Vocabulary violations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VocabularyError {
    #[error("{attribute} expects a different value kind")]
    KindMismatch { attribute: Attribute },

    #[error("{attribute} value {value} is outside its domain")]
    OutOfDomain { attribute: Attribute, value: String },

    #[error("{attribute} is not defined in vocabulary {version}")]
    NotInVersion {
        attribute: Attribute,
        version: VocabularyVersion,
    },
}

/// Structured, confidence-scored output of one extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub version: VocabularyVersion,
    pub values: BTreeMap<Attribute, ConfidenceValue<AttributeValue>>,
    /// Model output that did not fit the vocabulary; kept for audit, never aggregated
    #[serde(default)]
    pub quarantined: BTreeMap<String, serde_json::Value>,
}

impl AttributeSet {
    pub fn new(version: VocabularyVersion) -> Self {
        Self {
            version,
            values: BTreeMap::new(),
            quarantined: BTreeMap::new(),
        }
    }

    /// Insert a value after checking version and domain
    pub fn insert(
        &mut self,
        attribute: Attribute,
        value: AttributeValue,
        confidence: f64,
    ) -> Result<(), VocabularyError> {
        if !attribute.defined_in(self.version) {
            return Err(VocabularyError::NotInVersion {
                attribute,
                version: self.version,
            });
        }
        attribute.validate(&value)?;
        self.values.insert(attribute, ConfidenceValue::new(value, confidence));
        Ok(())
    }

    /// Builder-style insert for fixtures and stub extractors
    pub fn with(
        mut self,
        attribute: Attribute,
        value: AttributeValue,
        confidence: f64,
    ) -> Result<Self, VocabularyError> {
        self.insert(attribute, value, confidence)?;
        Ok(self)
    }

    pub fn quarantine(&mut self, key: impl Into<String>, raw: serde_json::Value) {
        self.quarantined.insert(key.into(), raw);
    }

    pub fn get(&self, attribute: Attribute) -> Option<&ConfidenceValue<AttributeValue>> {
        self.values.get(&attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
