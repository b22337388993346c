//! Password and Google sign-in, token refresh.

use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::dtos::auth::{GoogleCallbackRequest, LoginRequest, RefreshRequest, RegisterRequest};
use crate::dtos::UrlResponse;
use crate::models::User;
use crate::services::google::default_display_name;
use crate::services::state_store::OAUTH_STATE_TTL_SECONDS;
use crate::services::{TokenKind, TokenResponse};
use crate::utils::{clean_name, hash_password, pkce, verify_password, Password, PasswordHashString, ValidatedJson};
use crate::AppState;

/// Prefix separating Google sign-in states from Garmin PKCE states in the store.
const GOOGLE_STATE_PREFIX: &str = "google:";

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn issue_tokens(state: &AppState, user: &User) -> Result<Json<TokenResponse>, AppError> {
    state
        .jwt
        .generate_token_pair(user.id)
        .map(Json)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Token generation failed: {}", e)))
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    let email = normalize_email(&req.email);

    if state.db.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict(anyhow::anyhow!("Email already registered")));
    }

    let hash = hash_password(&Password::new(req.password)).map_err(AppError::InternalError)?;
    let user = User::new(email, clean_name(&req.full_name), Some(hash.into_string()));
    let user = state.db.create_user(&user).await?;

    tracing::info!(user_id = %user.id, "User registered");
    Ok((StatusCode::CREATED, issue_tokens(&state, &user)?))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let invalid = || AppError::unauthorized("Invalid credentials");

    let user = state
        .db
        .find_user_by_email(&normalize_email(&req.email))
        .await?
        .ok_or_else(invalid)?;

    let hash = user.password_hash.clone().ok_or_else(invalid)?;
    verify_password(&Password::new(req.password), &PasswordHashString::new(hash)).map_err(|_| {
        tracing::warn!(user_id = %user.id, "Failed login attempt");
        invalid()
    })?;

    issue_tokens(&state, &user)
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user_id = state
        .jwt
        .verify(&req.refresh_token, TokenKind::Refresh)
        .ok()
        .and_then(|claims| claims.subject_id())
        .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

    let user = state
        .db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    issue_tokens(&state, &user)
}

/// GET /auth/google/url
pub async fn google_url(State(state): State<AppState>) -> Result<Json<UrlResponse>, AppError> {
    let oauth_state = pkce::random_token(32);
    state
        .oauth_states
        .put(
            &format!("{}{}", GOOGLE_STATE_PREFIX, oauth_state),
            "1",
            OAUTH_STATE_TTL_SECONDS,
        )
        .await?;

    Ok(Json(UrlResponse {
        url: state.google.authorization_url(&oauth_state),
    }))
}

/// POST /auth/google/callback
pub async fn google_callback(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GoogleCallbackRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if let Some(oauth_state) = req.state.as_deref() {
        let known = state
            .oauth_states
            .take(&format!("{}{}", GOOGLE_STATE_PREFIX, oauth_state))
            .await?;
        if known.is_none() {
            return Err(AppError::bad_request("Invalid or expired state parameter"));
        }
    }

    let tokens = state.google.exchange_code(&req.code).await.map_err(|e| {
        tracing::warn!(error = %e, "Google code exchange failed");
        AppError::unauthorized("Failed to exchange Google authorization code")
    })?;

    let info = state.google.user_info(&tokens.access_token).await.map_err(|e| {
        tracing::warn!(error = %e, "Google userinfo failed");
        AppError::unauthorized("Failed to fetch Google user info")
    })?;

    let existing = match state.db.find_user_by_google_id(&info.id).await? {
        Some(user) => Some(user),
        None => state.db.find_user_by_email(&normalize_email(&info.email)).await?,
    };

    let user = match existing {
        Some(user) => user,
        None => {
            let user = User::new(
                normalize_email(&info.email),
                clean_name(&default_display_name(&info)),
                None,
            );
            let user = state.db.create_user(&user).await?;
            tracing::info!(user_id = %user.id, "User registered via Google");
            user
        }
    };

    let user = state
        .db
        .set_google_identity(
            user.id,
            &info.id,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
        )
        .await?;

    issue_tokens(&state, &user)
}
