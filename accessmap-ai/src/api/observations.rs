//! Observation submission endpoint

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::fusion::AccessibilitySummary;
use crate::services::{SubmissionReceipt, SubmissionRequest};
use crate::AppState;

/// POST /observations request body
#[derive(Debug, Deserialize)]
pub struct SubmitObservationRequest {
    /// Standard base64 of the raw image bytes
    pub image_base64: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub venue_hint: Option<String>,
    pub user_ref: String,
}

/// POST /observations response body
#[derive(Debug, Serialize)]
pub struct SubmitObservationResponse {
    #[serde(flatten)]
    pub receipt: SubmissionReceipt,
    pub summary: AccessibilitySummary,
}

/// POST /observations
///
/// Runs the submission on its own task. If the client disconnects, this
/// handler future is dropped, the drop guard cancels the token, and an
/// extraction still in flight is abandoned before anything is stored.
pub async fn submit_observation(
    State(state): State<AppState>,
    Json(body): Json<SubmitObservationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitObservationResponse>)> {
    let image = base64::engine::general_purpose::STANDARD
        .decode(body.image_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {}", e)))?;

    info!(
        user_ref = %body.user_ref,
        latitude = body.latitude,
        longitude = body.longitude,
        bytes = image.len(),
        "Observation submitted"
    );

    let request = SubmissionRequest {
        image,
        latitude: body.latitude,
        longitude: body.longitude,
        venue_hint: body.venue_hint,
        user_ref: body.user_ref,
    };

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let submissions = state.submissions.clone();
    let task = tokio::spawn(async move { submissions.submit(request, cancel).await });

    let outcome = task
        .await
        .map_err(|e| ApiError::Internal(format!("submission task failed: {}", e)))?;

    match outcome {
        Ok(receipt) => {
            let summary = AccessibilitySummary::from_record(&receipt.record);
            Ok((StatusCode::CREATED, Json(SubmitObservationResponse { receipt, summary })))
        }
        Err(err) => {
            let api_err = ApiError::from(err);
            if api_err.status().is_server_error() {
                *state.last_error.write().await = Some(api_err.to_string());
            }
            Err(api_err)
        }
    }
}

/// Room for the JSON fields around the encoded image
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Largest request body that can still carry a `max_image_bytes` image
///
/// Base64 grows the payload by 4/3; anything past this could only decode to
/// an image over the limit.
pub fn body_limit_for(max_image_bytes: usize) -> usize {
    max_image_bytes.div_ceil(3) * 4 + BODY_OVERHEAD_BYTES
}

/// Build observation routes
pub fn observation_routes(max_image_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/observations", post(submit_observation))
        .layer(DefaultBodyLimit::max(body_limit_for(max_image_bytes)))
}
