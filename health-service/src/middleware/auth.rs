use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::{LabPartner, User};
use crate::services::TokenKind;
use crate::AppState;

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Requires a user access token and loads the user into request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

    let claims = state.jwt.verify(token, TokenKind::Access).map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        AppError::unauthorized("Invalid token")
    })?;

    let user_id = claims
        .subject_id()
        .ok_or_else(|| AppError::unauthorized("Invalid token"))?;

    let user = state
        .db
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Requires a portal token for an active partner.
pub async fn portal_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

    let partner_id = state
        .jwt
        .verify(token, TokenKind::Portal)
        .ok()
        .and_then(|claims| claims.subject_id())
        .ok_or_else(|| AppError::unauthorized("Invalid token"))?;

    let partner = state
        .db
        .find_partner(partner_id)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| AppError::unauthorized("Partner not found"))?;

    req.extensions_mut().insert(partner);

    Ok(next.run(req).await)
}

/// The authenticated user, placed by [`auth_middleware`].
pub struct AuthUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AppError::unauthorized("Not authenticated"))
    }
}

/// The authenticated lab partner, placed by [`portal_auth_middleware`].
pub struct AuthPartner(pub LabPartner);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthPartner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<LabPartner>()
            .cloned()
            .map(AuthPartner)
            .ok_or_else(|| AppError::unauthorized("Not authenticated"))
    }
}
