//! Database Test Utilities
//!
//! Every test gets its own file-backed database in a temp directory, so
//! concurrent writers behave the way they do in production (WAL, busy timeout).

use accessmap_ai::config::PipelineConfig;
use accessmap_ai::extractors::AttributeExtractor;
use accessmap_ai::services::ImageStore;
use accessmap_ai::AppState;
use accessmap_common::events::EventBus;
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("accessmap.db");
    let pool = accessmap_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Pipeline settings tuned for fast tests
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        extraction_timeout_ms: 250,
        extraction_retry_backoff_ms: 1,
        store_retry_backoff_ms: 1,
        ..PipelineConfig::default()
    }
}

/// Full application state around a fresh database
pub async fn create_test_state(
    extractor: Arc<dyn AttributeExtractor>,
    config: PipelineConfig,
) -> Result<(TempDir, AppState)> {
    let (temp_dir, pool) = create_test_db().await?;
    let images = ImageStore::new(temp_dir.path().join("images"));
    let state = AppState::new(pool, EventBus::new(100), config, extractor, images);
    Ok((temp_dir, state))
}
