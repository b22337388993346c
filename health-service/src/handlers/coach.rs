use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::coach::{ConversationCreate, MessageCreate};
use crate::middleware::AuthUser;
use crate::models::{Conversation, Message};
use crate::utils::ValidatedJson;
use crate::AppState;

async fn user_conversation(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Conversation, AppError> {
    state
        .db
        .find_conversation(conversation_id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation not found"))
}

/// POST /conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(req): ValidatedJson<ConversationCreate>,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    let conversation = Conversation::new(user.id, req.title, req.conversation_type);
    let conversation = state.db.create_conversation(&conversation).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Conversation>>, AppError> {
    Ok(Json(state.db.list_conversations(user.id).await?))
}

/// GET /conversations/:id/messages
pub async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, AppError> {
    user_conversation(&state, conversation_id, user.id).await?;
    Ok(Json(state.db.list_messages(conversation_id).await?))
}

/// POST /conversations/:id/messages, answered as `text/event-stream`.
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<MessageCreate>,
) -> Result<Response, AppError> {
    let conversation = user_conversation(&state, conversation_id, user.id).await?;

    tracing::info!(conversation_id = %conversation.id, user_id = %user.id, "Coach message received");
    let stream = state.coach.stream_reply(user, conversation, req.content).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        [("x-accel-buffering", "no")],
        Body::from_stream(stream),
    )
        .into_response())
}
