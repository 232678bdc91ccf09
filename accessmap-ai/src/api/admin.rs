//! Administrative endpoints: reassignment and replay

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiResult;
use crate::services::{ReassignmentOutcome, RecomputeSummary};
use crate::types::{EntranceId, ObservationId};
use crate::AppState;

/// POST /admin/observations/:id/reassign request body
#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub target_entrance_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /admin/recompute query parameters
#[derive(Debug, Deserialize)]
pub struct RecomputeQuery {
    /// Evaluation instant (RFC 3339); defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

/// POST /admin/observations/:id/reassign
pub async fn reassign_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ReassignRequest>,
) -> ApiResult<Json<ReassignmentOutcome>> {
    info!(observation_id = id, target_entrance_id = body.target_entrance_id, "Reassignment requested");
    let outcome = state
        .maintenance
        .reassign_observation(ObservationId(id), EntranceId(body.target_entrance_id), body.reason.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// POST /admin/recompute
pub async fn recompute_all(
    State(state): State<AppState>,
    Query(query): Query<RecomputeQuery>,
) -> ApiResult<Json<RecomputeSummary>> {
    let as_of = query.as_of.unwrap_or_else(accessmap_common::time::now);
    let summary = state.maintenance.recompute_all(as_of).await?;
    Ok(Json(summary))
}

/// Build admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/observations/:id/reassign", post(reassign_observation))
        .route("/admin/recompute", post(recompute_all))
}
