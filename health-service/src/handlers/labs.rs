//! Lab panels, orders, results and PDF intake for signed-in users.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use std::time::Duration;
use uuid::Uuid;

use super::read_pdf_upload;
use crate::dtos::labs::OrderCreate;
use crate::dtos::UrlResponse;
use crate::middleware::AuthUser;
use crate::models::{
    BiomarkerHistoryPoint, LabOrder, LabPanel, LabResult, OrderRead, ResultRead,
    ResultSummaryRead,
};
use crate::services::gmail::{self, GmailAuth};
use crate::services::storage::safe_file_name;
use crate::utils::generate_order_code;
use crate::AppState;

const ORDER_CODE_ATTEMPTS: usize = 3;

/// GET /lab/panels
pub async fn list_panels(State(state): State<AppState>) -> Result<Json<Vec<LabPanel>>, AppError> {
    Ok(Json(state.db.list_active_panels().await?))
}

/// POST /lab/orders
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<OrderCreate>,
) -> Result<(StatusCode, Json<OrderRead>), AppError> {
    state
        .db
        .find_panel(req.panel_id)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| AppError::not_found("Panel not found"))?;

    let prefix = match req.lab_partner_id {
        Some(partner_id) => state
            .db
            .find_partner(partner_id)
            .await?
            .map(|p| p.code_prefix),
        None => None,
    };

    // Codes are random; retry the rare unique collision.
    let mut attempt = 0;
    let order = loop {
        attempt += 1;
        let order = LabOrder::new(
            user.id,
            req.panel_id,
            generate_order_code(prefix.as_deref()),
            req.lab_partner_id,
        );
        match state.db.create_order(&order).await {
            Ok(order) => break order,
            Err(AppError::Conflict(_)) if attempt < ORDER_CODE_ATTEMPTS => continue,
            Err(e) => return Err(e),
        }
    };

    tracing::info!(
        user_id = %user.id,
        order_id = %order.id,
        order_code = %order.order_code,
        "Lab order created"
    );
    metrics::counter!("lab_orders_created_total").increment(1);

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /lab/orders
pub async fn list_orders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<OrderRead>>, AppError> {
    let orders = state.db.list_orders(user.id).await?;
    Ok(Json(orders.into_iter().map(OrderRead::from).collect()))
}

/// GET /lab/results
pub async fn list_results(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ResultSummaryRead>>, AppError> {
    let results = state.db.list_results(user.id).await?;
    Ok(Json(results.into_iter().map(ResultSummaryRead::from).collect()))
}

/// GET /lab/results/:id
pub async fn get_result(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(result_id): Path<Uuid>,
) -> Result<Json<ResultRead>, AppError> {
    let result = state
        .db
        .find_user_result(result_id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Result not found"))?;

    let values = state.db.list_biomarker_values(result.id).await?;
    Ok(Json(ResultRead::new(result, values)))
}

/// GET /lab/biomarkers/:code/history
pub async fn biomarker_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(code): Path<String>,
) -> Result<Json<Vec<BiomarkerHistoryPoint>>, AppError> {
    let values = state.db.biomarker_history(user.id, &code).await?;
    Ok(Json(
        values.into_iter().map(BiomarkerHistoryPoint::from).collect(),
    ))
}

/// POST /lab/results/upload
pub async fn upload_result(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ResultSummaryRead>), AppError> {
    let (filename, data) = read_pdf_upload(multipart).await?;

    let key = format!(
        "uploads/{}/{}-{}",
        user.id,
        Uuid::new_v4(),
        safe_file_name(&filename)
    );
    let size = data.len();
    state.storage.upload(&key, data).await?;

    let result = state
        .db
        .create_result(&LabResult::pending(user.id, None, key))
        .await?;
    state.jobs.enqueue_or_log(result.id);

    tracing::info!(user_id = %user.id, result_id = %result.id, size, "Lab PDF uploaded");
    Ok((StatusCode::CREATED, Json(result.into())))
}

/// GET /lab/results/:id/pdf-url
pub async fn pdf_url(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(result_id): Path<Uuid>,
) -> Result<Json<UrlResponse>, AppError> {
    let result = state
        .db
        .find_user_result(result_id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Result not found"))?;

    let key = result
        .pdf_storage_key
        .ok_or_else(|| AppError::not_found("No PDF stored for this result"))?;

    let url = state
        .storage
        .presigned_url(
            &key,
            Duration::from_secs(state.config.storage.presign_expiry_seconds),
        )
        .await?;

    Ok(Json(UrlResponse { url }))
}

/// POST /lab/import/gmail
pub async fn import_gmail(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ResultSummaryRead>>, AppError> {
    let Some(mut auth) = GmailAuth::for_user(&user) else {
        tracing::info!(user_id = %user.id, "Gmail import skipped, no Google tokens");
        return Ok(Json(Vec::new()));
    };

    let emails = state.gmail.search_lab_emails(&mut auth).await?;

    let mut created = Vec::new();
    for email in &emails {
        for attachment in &email.attachments {
            let Some(data) = state
                .gmail
                .download_attachment(&mut auth, &email.message_id, &attachment.attachment_id)
                .await?
            else {
                tracing::warn!(
                    user_id = %user.id,
                    message_id = %email.message_id,
                    filename = %attachment.filename,
                    "Gmail attachment download failed"
                );
                continue;
            };

            let key =
                gmail::import_storage_key(user.id, &email.message_id, &attachment.filename);
            state.storage.upload(&key, data).await?;

            let result = state
                .db
                .create_result(&LabResult::pending(user.id, None, key))
                .await?;
            state.jobs.enqueue_or_log(result.id);

            tracing::info!(
                user_id = %user.id,
                result_id = %result.id,
                subject = %email.subject,
                "Imported lab PDF from Gmail"
            );
            created.push(ResultSummaryRead::from(result));
        }
    }

    metrics::counter!("gmail_imported_results_total").increment(created.len() as u64);
    Ok(Json(created))
}
