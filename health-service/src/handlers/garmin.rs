//! Garmin connection lifecycle, data queries and the push webhook.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::garmin::{
    ConnectUrlResponse, DataQuery, GarminCallbackRequest, SyncRequest, SyncResponse,
};
use crate::dtos::StatusResponse;
use crate::middleware::AuthUser;
use crate::models::{ConnectionRead, GarminDataPoint};
use crate::services::garmin;
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /garmin/connect-url
pub async fn connect_url(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ConnectUrlResponse>, AppError> {
    let (url, oauth_state) = state
        .garmin
        .begin_authorization(state.oauth_states.as_ref(), user.id)
        .await?;

    tracing::info!(user_id = %user.id, "Garmin authorization started");
    Ok(Json(ConnectUrlResponse {
        url,
        state: oauth_state,
    }))
}

/// POST /garmin/callback
pub async fn callback(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<GarminCallbackRequest>,
) -> Result<Json<ConnectionRead>, AppError> {
    let verifier = state
        .oauth_states
        .take(&garmin::state_key(user.id, &req.state))
        .await?
        .ok_or_else(|| AppError::bad_request("Invalid or expired state parameter"))?;

    let tokens = state
        .garmin
        .exchange_code(&req.code, &verifier)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Garmin code exchange failed");
            AppError::BadGateway("Failed to exchange code with Garmin".to_string())
        })?;

    let garmin_user_id = state
        .garmin
        .fetch_user_id(&tokens.access_token)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Garmin user id fetch failed");
            AppError::BadGateway("Failed to fetch Garmin user ID".to_string())
        })?;

    let connection = state
        .db
        .upsert_garmin_connection(
            user.id,
            &garmin_user_id,
            &tokens.access_token,
            tokens.refresh_token.as_deref().unwrap_or_default(),
            tokens.expires_at(),
        )
        .await?;

    tracing::info!(user_id = %user.id, garmin_user_id = %garmin_user_id, "Garmin connected");
    Ok(Json(connection.into()))
}

/// GET /garmin/connection
pub async fn get_connection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Option<ConnectionRead>>, AppError> {
    let connection = state.db.find_garmin_connection(user.id).await?;
    Ok(Json(connection.map(Into::into)))
}

/// DELETE /garmin/connection
pub async fn disconnect(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, AppError> {
    if !state.db.delete_garmin_connection(user.id).await? {
        return Err(AppError::not_found("No Garmin connection found"));
    }
    tracing::info!(user_id = %user.id, "Garmin disconnected");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /garmin/data?data_type=activity&days=7
pub async fn get_data(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<DataQuery>,
) -> Result<Json<Vec<GarminDataPoint>>, AppError> {
    query.validate()?;

    let today = Utc::now().date_naive();
    let from = today - Duration::days(query.days);
    let points = state
        .db
        .list_data_points(user.id, &query.data_type, from, today)
        .await?;
    Ok(Json(points))
}

/// POST /garmin/sync
pub async fn sync(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    let connection = state
        .db
        .find_garmin_connection(user.id)
        .await?
        .ok_or_else(|| AppError::not_found("No Garmin connection found"))?;

    let stored = state.garmin.sync(&state.db, &connection, req.days).await?;
    Ok(Json(SyncResponse { stored }))
}

/// POST /garmin/webhooks. Unauthenticated; always acknowledged so Garmin
/// does not retry.
pub async fn webhook(State(state): State<AppState>, body: Bytes) -> Json<StatusResponse> {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => {
            if let Err(e) = garmin::process_webhook(&state.db, &payload).await {
                tracing::error!(error = %e, "Garmin webhook processing failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Garmin webhook body is not JSON"),
    }
    Json(StatusResponse::ok())
}
