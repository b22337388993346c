use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

/// GET /health. Pings Postgres.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": state.config.service_name,
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// GET /ready
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
