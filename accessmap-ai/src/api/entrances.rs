//! Entrance detail endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::ApiResult;
use crate::services::EntranceDetail;
use crate::types::{EntranceId, Observation};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ObservationHistoryResponse {
    pub entrance_id: EntranceId,
    pub observations: Vec<Observation>,
}

/// GET /entrances/:id
pub async fn get_entrance(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<EntranceDetail>> {
    let detail = state.queries.entrance_detail(EntranceId(id)).await?;
    Ok(Json(detail))
}

/// GET /entrances/:id/observations
///
/// Oldest first.
pub async fn get_entrance_observations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ObservationHistoryResponse>> {
    let entrance_id = EntranceId(id);
    let observations = state.queries.entrance_observations(entrance_id).await?;
    Ok(Json(ObservationHistoryResponse {
        entrance_id,
        observations,
    }))
}

/// Build entrance routes
pub fn entrance_routes() -> Router<AppState> {
    Router::new()
        .route("/entrances/:id", get(get_entrance))
        .route("/entrances/:id/observations", get(get_entrance_observations))
}
