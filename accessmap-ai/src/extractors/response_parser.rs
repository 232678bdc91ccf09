//! Model reply → [`AttributeSet`]
//!
//! The model is asked for a JSON object of the form
//!
//! ```json
//! {"attributes": {"has_step": {"value": true, "confidence": 0.9}, ...}}
//! ```
//!
//! but replies are free text, so the parser takes the outermost `{...}` span,
//! accepts a bare attribute map as well as the wrapped form, and accepts bare
//! values without a confidence. Unknown keys are quarantined; known keys with
//! values outside their domain are dropped.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ExtractionError;
use crate::vocabulary::{Attribute, AttributeSet, VocabularyVersion};

/// Confidence assigned to values the model reported without one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Parse the model's text reply
pub fn parse_reply(text: &str, version: VocabularyVersion) -> Result<AttributeSet, ExtractionError> {
    let object = extract_json_object(text)?;

    let attributes = match object.get("attributes") {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(ExtractionError::Unreadable(
                "model reply has a non-object \"attributes\" field".to_string(),
            ))
        }
        None => object,
    };

    if let Some(Value::String(reason)) = attributes.get("unreadable") {
        return Err(ExtractionError::Unreadable(format!("model could not read image: {}", reason)));
    }

    Ok(build_attribute_set(attributes, version))
}

/// Locate and parse the outermost JSON object in free text
fn extract_json_object(text: &str) -> Result<Map<String, Value>, ExtractionError> {
    let start = text.find('{');
    let end = text.rfind('}');

    let slice = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => {
            return Err(ExtractionError::Unreadable(
                "model reply contains no JSON object".to_string(),
            ))
        }
    };

    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ExtractionError::Unreadable("model reply is not a JSON object".to_string())),
        Err(e) => Err(ExtractionError::Unreadable(format!("model reply is not valid JSON: {}", e))),
    }
}

fn build_attribute_set(attributes: Map<String, Value>, version: VocabularyVersion) -> AttributeSet {
    let mut set = AttributeSet::new(version);

    for (key, raw) in attributes {
        let Some(attribute) = Attribute::from_key(&key).filter(|a| a.defined_in(version)) else {
            debug!(key = %key, "Quarantining key outside vocabulary {}", version);
            set.quarantine(key, raw);
            continue;
        };

        let (raw_value, confidence) = split_scored(&raw);
        if raw_value.is_null() {
            // Model explicitly could not tell
            continue;
        }

        let Some(value) = attribute.parse_value(raw_value) else {
            warn!(attribute = %attribute, value = %raw_value, "Dropping value outside attribute domain");
            continue;
        };

        if let Err(e) = set.insert(attribute, value, confidence) {
            warn!(attribute = %attribute, "Dropping value: {}", e);
        }
    }

    set
}

/// Split `{"value": v, "confidence": c}` or a bare value
fn split_scored(raw: &Value) -> (&Value, f64) {
    match raw {
        Value::Object(map) if map.contains_key("value") => {
            let value = &map["value"];
            let confidence = map
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_CONFIDENCE);
            (value, confidence)
        }
        other => (other, DEFAULT_CONFIDENCE),
    }
}
