//! Configuration for accessmap-ai
//!
//! The service TOML file extends the shared [`TomlConfig`] with `[pipeline]`
//! (thresholds and policies) and `[vision]` (inference endpoint) tables.
//! The vision API key is resolved with Database → ENV → TOML priority.

use accessmap_common::config::TomlConfig;
use accessmap_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable carrying the vision API key
pub const VISION_API_KEY_ENV: &str = "ACCESSMAP_VISION_API_KEY";

/// `[pipeline]` table: every tunable threshold and policy of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Entrance resolution radius in meters
    pub proximity_threshold_m: f64,
    /// Observations older than this are stale
    pub staleness_window_days: u32,
    /// Weight multiplier for supported but retired vocabulary versions
    pub retired_version_weight: f64,
    /// Observations tagged below this version are ignored by aggregation
    pub min_supported_vocabulary_version: u16,
    /// Deadline for one inference call
    pub extraction_timeout_ms: u64,
    /// Backoff before the single extraction retry
    pub extraction_retry_backoff_ms: u64,
    /// Backoff before the single store-write retry
    pub store_retry_backoff_ms: u64,
    /// Largest accepted image payload
    pub max_image_bytes: usize,
    /// Largest accepted query radius in meters
    pub max_query_radius_m: f64,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Visibility policy: attributes need at least this many supporting observations
    pub min_supporting_observations: usize,
    /// Visibility policy: attributes need at least this confidence
    pub min_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_m: 20.0,
            staleness_window_days: 180,
            retired_version_weight: 0.5,
            min_supported_vocabulary_version: 1,
            extraction_timeout_ms: 30_000,
            extraction_retry_backoff_ms: 500,
            store_retry_backoff_ms: 50,
            max_image_bytes: 10 * 1024 * 1024,
            max_query_radius_m: 5_000.0,
            default_page_size: 50,
            max_page_size: 200,
            min_supporting_observations: 1,
            min_confidence: 0.0,
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.proximity_threshold_m.is_finite() && self.proximity_threshold_m > 0.0) {
            return Err(Error::Config("proximity_threshold_m must be > 0".to_string()));
        }
        if self.staleness_window_days == 0 {
            return Err(Error::Config("staleness_window_days must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retired_version_weight) {
            return Err(Error::Config("retired_version_weight must be within [0, 1]".to_string()));
        }
        if self.extraction_timeout_ms == 0 {
            return Err(Error::Config("extraction_timeout_ms must be > 0".to_string()));
        }
        if self.max_image_bytes == 0 {
            return Err(Error::Config("max_image_bytes must be > 0".to_string()));
        }
        if !(self.max_query_radius_m.is_finite() && self.max_query_radius_m > 0.0) {
            return Err(Error::Config("max_query_radius_m must be > 0".to_string()));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(Error::Config(
                "default_page_size must be within [1, max_page_size]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config("min_confidence must be within [0, 1]".to_string()));
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.staleness_window_days))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    pub fn extraction_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.extraction_retry_backoff_ms)
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }
}

/// `[vision]` table: the external inference collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Chat-completions style endpoint accepting image input
    pub endpoint: String,
    pub model: String,
    /// Lowest-priority key source (database and ENV win)
    pub api_key: Option<String>,
    /// Outbound request rate limit
    pub requests_per_second: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            requests_per_second: 5,
        }
    }
}

/// Complete accessmap-ai TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub base: TomlConfig,
    pub pipeline: PipelineConfig,
    pub vision: VisionConfig,
}

/// Resolve the vision API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_vision_api_key(db: &Pool<Sqlite>, vision: &VisionConfig) -> Result<String> {
    let mut sources = Vec::new();

    let db_key = crate::db::settings::get_vision_api_key(db).await?;
    if db_key.as_deref().is_some_and(is_valid_key) {
        sources.push("database");
    }

    let env_key = std::env::var(VISION_API_KEY_ENV).ok();
    if env_key.as_deref().is_some_and(is_valid_key) {
        sources.push("environment");
    }

    let toml_key = vision.api_key.as_ref();
    if toml_key.is_some_and(|k| is_valid_key(k)) {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "Vision API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key.filter(|k| is_valid_key(k)) {
        info!("Vision API key loaded from database");
        return Ok(key);
    }

    if let Some(key) = env_key.filter(|k| is_valid_key(k)) {
        info!("Vision API key loaded from environment variable");
        return Ok(key);
    }

    if let Some(key) = toml_key.filter(|k| is_valid_key(k)) {
        info!("Vision API key loaded from TOML config");
        return Ok(key.clone());
    }

    Err(Error::Config(format!(
        "Vision API key not configured. Please configure using one of:\n\
         1. Database: settings key 'vision_api_key'\n\
         2. Environment: {}=your-key-here\n\
         3. TOML config: [vision] api_key = \"your-key\"",
        VISION_API_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proximity_threshold_m, 20.0);
        assert_eq!(config.staleness_window(), chrono::Duration::days(180));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PipelineConfig {
            proximity_threshold_m: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            retired_version_weight: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            default_page_size: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_config_parses_partial_toml() {
        let toml_str = r#"
            root_folder = "/srv/accessmap"

            [logging]
            level = "debug"

            [pipeline]
            proximity_threshold_m = 15.0
            min_supporting_observations = 2

            [vision]
            model = "vision-large"
        "#;

        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.base.root_folder.as_deref(), Some(std::path::Path::new("/srv/accessmap")));
        assert_eq!(config.base.logging.level, "debug");
        assert_eq!(config.pipeline.proximity_threshold_m, 15.0);
        assert_eq!(config.pipeline.min_supporting_observations, 2);
        // Unspecified fields keep their defaults
        assert_eq!(config.pipeline.staleness_window_days, 180);
        assert_eq!(config.vision.model, "vision-large");
        assert_eq!(config.vision.requests_per_second, 5);
        assert_eq!(config.base.server.port, 5780);
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }
}
