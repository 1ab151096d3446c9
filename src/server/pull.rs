use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use tracing::error;

use super::AppState;

/// `GET /sydneytrainsnearme.geojson`: one cache read, one response.
pub async fn vehicle_positions(State(state): State<AppState>) -> Response {
    match state.cache.get().await {
        Ok(payload) => ([(CONTENT_TYPE, "application/json")], payload).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serve vehicle positions");
            (StatusCode::INTERNAL_SERVER_ERROR, "vehicle positions unavailable").into_response()
        }
    }
}
