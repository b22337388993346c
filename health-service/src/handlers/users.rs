use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::users::{HealthProfileUpdate, UserUpdateRequest};
use crate::middleware::AuthUser;
use crate::models::{UserHealthProfile, UserRead};
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /users/me
pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserRead> {
    Json(user.into())
}

/// PATCH /users/me
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<UserUpdateRequest>,
) -> Result<Json<UserRead>, AppError> {
    let updated = state.db.update_user(user.id, &req.into()).await?;
    Ok(Json(updated.into()))
}

/// PUT /users/me/health-profile
pub async fn update_health_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<HealthProfileUpdate>,
) -> Result<Json<UserHealthProfile>, AppError> {
    let profile = state
        .db
        .upsert_health_profile(
            user.id,
            req.medical_conditions.as_ref(),
            req.lifestyle_notes.as_ref(),
        )
        .await?;
    Ok(Json(profile))
}
