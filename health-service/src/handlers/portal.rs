//! Lab-partner portal: partner login, assigned orders, result upload and review.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::read_pdf_upload;
use crate::dtos::portal::{
    PortalLoginRequest, PortalOrdersQuery, PortalTokenResponse, ReviewRequest, UploadResponse,
};
use crate::middleware::AuthPartner;
use crate::models::{LabResult, PortalOrderRead, ResultRead};
use crate::services::storage::safe_file_name;
use crate::services::TokenKind;
use crate::utils::{verify_password, Password, PasswordHashString, ValidatedJson};
use crate::AppState;

/// POST /portal/auth/login
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PortalLoginRequest>,
) -> Result<Json<PortalTokenResponse>, AppError> {
    let invalid = || AppError::unauthorized("Invalid credentials");

    let partner = state
        .db
        .find_partner_by_prefix(&req.code_prefix)
        .await?
        .filter(|p| p.active)
        .ok_or_else(invalid)?;

    let hash = partner.password_hash.clone().ok_or_else(invalid)?;
    verify_password(&Password::new(req.password), &PasswordHashString::new(hash)).map_err(|_| {
        tracing::warn!(partner_id = %partner.id, "Failed portal login attempt");
        invalid()
    })?;

    let access_token = state
        .jwt
        .issue(&partner.id.to_string(), TokenKind::Portal)
        .map_err(AppError::InternalError)?;

    tracing::info!(partner_id = %partner.id, "Partner logged in");
    Ok(Json(PortalTokenResponse {
        access_token,
        partner_id: partner.id,
        partner_name: partner.name,
    }))
}

/// GET /portal/orders
pub async fn list_orders(
    State(state): State<AppState>,
    AuthPartner(partner): AuthPartner,
    Query(query): Query<PortalOrdersQuery>,
) -> Result<Json<Vec<PortalOrderRead>>, AppError> {
    let code = query
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    Ok(Json(state.db.list_partner_orders(partner.id, code).await?))
}

/// POST /portal/orders/:id/results
pub async fn upload_result(
    State(state): State<AppState>,
    AuthPartner(partner): AuthPartner,
    Path(order_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let order = state
        .db
        .find_partner_order(order_id, partner.id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;

    let (filename, data) = read_pdf_upload(multipart).await?;

    let key = format!("results/{}/{}", order.order_code, safe_file_name(&filename));
    state.storage.upload(&key, data).await?;

    let result = state
        .db
        .create_result_for_order(order.id, &LabResult::pending(order.user_id, Some(order.id), key))
        .await?;
    state.jobs.enqueue_or_log(result.id);

    tracing::info!(
        partner_id = %partner.id,
        order_id = %order.id,
        result_id = %result.id,
        "Partner uploaded lab result"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            result_id: result.id,
            status: "pending",
        }),
    ))
}

/// POST /portal/results/:id/review
pub async fn review_result(
    State(state): State<AppState>,
    AuthPartner(partner): AuthPartner,
    Path(result_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReviewRequest>,
) -> Result<Json<ResultRead>, AppError> {
    let result = state
        .db
        .find_partner_result(result_id, partner.id)
        .await?
        .ok_or_else(|| AppError::not_found("Result not found"))?;

    let verified = state
        .db
        .verify_result(result.id, &req.reviewer)
        .await?
        .ok_or_else(|| {
            AppError::Conflict(anyhow::anyhow!(
                "Result is {} and cannot be reviewed",
                result.processing_status
            ))
        })?;

    tracing::info!(
        partner_id = %partner.id,
        result_id = %verified.id,
        reviewer = %req.reviewer,
        "Lab result verified by reviewer"
    );

    let values = state.db.list_biomarker_values(verified.id).await?;
    Ok(Json(ResultRead::new(verified, values)))
}
