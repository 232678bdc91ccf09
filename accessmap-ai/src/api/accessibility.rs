//! Near-me accessibility query endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::services::NearbyPage;
use crate::AppState;

/// GET /accessibility/near query parameters
#[derive(Debug, Deserialize)]
pub struct NearQuery {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// GET /accessibility/near
pub async fn accessibility_near(
    State(state): State<AppState>,
    Query(query): Query<NearQuery>,
) -> ApiResult<Json<NearbyPage>> {
    let page = state
        .queries
        .query_near(query.lat, query.lon, query.radius_m, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(Json(page))
}

/// Build accessibility query routes
pub fn accessibility_routes() -> Router<AppState> {
    Router::new().route("/accessibility/near", get(accessibility_near))
}
