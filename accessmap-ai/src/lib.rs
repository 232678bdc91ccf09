//! accessmap-ai library interface
//!
//! Exposes the pipeline components and the HTTP router for the binary and
//! for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fusion;
pub mod services;
pub mod types;
pub mod utils;
pub mod vocabulary;

pub use crate::error::{ApiError, ApiResult};

use accessmap_common::events::EventBus;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::PipelineConfig;
use crate::extractors::{AttributeExtractor, BoundedExtractor};
use crate::fusion::{AggregationEngine, AggregationPolicy};
use crate::services::{
    EntranceLocks, EntranceResolver, ImageStore, MaintenanceService, QueryService, SubmissionService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub submissions: Arc<SubmissionService>,
    pub queries: Arc<QueryService>,
    pub maintenance: Arc<MaintenanceService>,
    /// Per-entrance locks shared by submission and maintenance
    pub locks: EntranceLocks,
    pub config: Arc<PipelineConfig>,
    /// False when no vision API key was found; submissions then fail fast
    pub extractor_configured: bool,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire every service around one pool, one event bus and one extractor
    ///
    /// Submission and maintenance share the per-entrance locks so their
    /// recomputations of the same entrance never interleave.
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: PipelineConfig,
        extractor: Arc<dyn AttributeExtractor>,
        images: ImageStore,
    ) -> Self {
        let locks = EntranceLocks::new();
        let engine = AggregationEngine::new(AggregationPolicy::from_config(&config));

        let submissions = SubmissionService::new(
            db.clone(),
            BoundedExtractor::from_config(extractor, &config),
            EntranceResolver::new(config.proximity_threshold_m),
            locks.clone(),
            engine.clone(),
            images,
            event_bus.clone(),
            config.max_image_bytes,
            config.store_retry_backoff(),
        );
        let queries = QueryService::new(db.clone(), &config);
        let maintenance = MaintenanceService::new(
            db.clone(),
            locks.clone(),
            engine,
            event_bus.clone(),
            config.store_retry_backoff(),
        );

        Self {
            db,
            event_bus,
            submissions: Arc::new(submissions),
            queries: Arc::new(queries),
            maintenance: Arc::new(maintenance),
            locks,
            config: Arc::new(config),
            extractor_configured: true,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_extractor_configured(mut self, configured: bool) -> Self {
        self.extractor_configured = configured;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::observation_routes(state.config.max_image_bytes))
        .merge(api::accessibility_routes())
        .merge(api::entrance_routes())
        .merge(api::admin_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
