//! AI coach: prompt and context assembly plus the streamed reply.

use crate::models::{Conversation, Message, MessageRole, User, UserHealthProfile};
use crate::services::database::Database;
use crate::services::providers::{ChatMessage, ChatProvider, ProviderStream, StreamChunk};
use axum::body::Bytes;
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use serde_json::Value;
use service_core::error::AppError;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

pub const MAX_HISTORY_MESSAGES: i64 = 50;
pub const TITLE_MAX_CHARS: usize = 100;
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub const SYSTEM_PROMPT_ES: &str = "\
Eres Nove, un coach de salud personal impulsado por inteligencia artificial. \
Tu objetivo es ayudar a los usuarios a entender y mejorar su salud a traves de \
conversaciones informadas y empaticas.

## Rol y Limites
- Eres un coach de salud, NO un medico. Nunca diagnostiques ni recetes.
- Cuando algo requiera atencion medica, recomienda consultar a un profesional.
- Basa tus recomendaciones en evidencia cientifica.
- Sé honesto cuando no tengas suficiente informacion para responder.

## Estilo
- Conversacional y calido, pero profesional.
- Usa espanol neutro (Guatemala).
- Respuestas concisas - no mas de 2-3 parrafos salvo que el usuario pida mas detalle.
- Cuando menciones datos del usuario (labs, wearables), cita los valores especificos.

## Contexto Disponible
Se te proporcionara:
- Perfil de salud del usuario (edad, sexo, peso, altura, metas, condiciones)
- Historial de conversacion actual
- Resumen de datos de wearable (si conectado)
- Resultados de laboratorio recientes (si disponibles)

Usa este contexto para personalizar tus respuestas. Si no tienes datos suficientes, \
pregunta al usuario.";

pub const SYSTEM_PROMPT_EN: &str = "\
You are Nove, a personal health coach powered by artificial intelligence. \
Your goal is to help users understand and improve their health through informed \
and empathetic conversations.

## Role and Boundaries
- You are a health coach, NOT a doctor. Never diagnose or prescribe.
- When something requires medical attention, recommend consulting a professional.
- Base your recommendations on scientific evidence.
- Be honest when you don't have enough information to answer.

## Style
- Conversational and warm, but professional.
- Concise responses - no more than 2-3 paragraphs unless the user asks for more detail.
- When mentioning user data (labs, wearables), cite specific values.

## Available Context
You will be provided with:
- User health profile (age, sex, weight, height, goals, conditions)
- Current conversation history
- Wearable data summary (if connected)
- Recent lab results (if available)

Use this context to personalize your responses. If you don't have enough data, \
ask the user.";

pub fn system_prompt(language: &str) -> &'static str {
    if language == "es" {
        SYSTEM_PROMPT_ES
    } else {
        SYSTEM_PROMPT_EN
    }
}

/// Profile lines for the system prompt. Only fields that are set appear.
pub fn build_profile_context(
    user: &User,
    profile: Option<&UserHealthProfile>,
    today: NaiveDate,
) -> String {
    let mut parts = vec![format!("Nombre: {}", user.full_name)];

    if let Some(age) = user.age_on(today) {
        parts.push(format!("Edad: {} anos", age));
    }
    if let Some(sex) = user.sex.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Sexo: {}", sex));
    }
    if let Some(weight) = user.weight_kg.filter(|w| *w != 0.0) {
        parts.push(format!("Peso: {} kg", weight));
    }
    if let Some(height) = user.height_cm.filter(|h| *h != 0.0) {
        parts.push(format!("Altura: {} cm", height));
    }
    if let Some(goals) = user.health_goals.as_ref().filter(|g| !g.is_empty()) {
        parts.push(format!("Metas: {}", goals.join(", ")));
    }

    if let Some(profile) = profile {
        if let Some(conditions) = profile.medical_conditions.as_ref().and_then(render_json) {
            parts.push(format!("Condiciones medicas: {}", conditions));
        }
        if let Some(notes) = profile.lifestyle_notes.as_ref().and_then(render_json) {
            parts.push(format!("Estilo de vida: {}", notes));
        }
    }

    parts.join("\n")
}

/// Plain text for free-form profile JSON; empty values render as nothing.
fn render_json(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) if items.iter().all(Value::is_string) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

pub fn build_system_prompt(
    user: &User,
    profile: Option<&UserHealthProfile>,
    today: NaiveDate,
) -> String {
    format!(
        "{}\n\n## Perfil del Usuario\n{}",
        system_prompt(&user.language),
        build_profile_context(user, profile, today)
    )
}

pub fn history_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| m.role != MessageRole::System.as_str())
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect()
}

pub fn conversation_title(user_message: &str) -> String {
    user_message.chars().take(TITLE_MAX_CHARS).collect()
}

/// One SSE frame; multi-line text becomes one `data:` line per line.
pub fn sse_data_frame(text: &str) -> String {
    let mut frame = String::with_capacity(text.len() + 8);
    for line in text.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

pub fn sse_error_frame(message: &str) -> String {
    format!("event: error\n{}", sse_data_frame(message))
}

/// Forward provider chunks as SSE frames. Returns the full reply, or `None`
/// if the provider failed (an error frame has been sent by then).
pub async fn relay_stream(
    mut upstream: ProviderStream,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
) -> Option<String> {
    let mut full = String::new();

    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(StreamChunk::Text(text)) => {
                full.push_str(&text);
                // a closed receiver means the client left; keep collecting
                let _ = tx.send(Ok(Bytes::from(sse_data_frame(&text)))).await;
            }
            Ok(StreamChunk::Complete {
                input_tokens,
                output_tokens,
            }) => {
                tracing::debug!(input_tokens, output_tokens, "Coach stream complete");
            }
            Err(e) => {
                tracing::error!(error = %e, "Coach stream failed");
                let _ = tx
                    .send(Ok(Bytes::from(sse_error_frame("Stream interrupted"))))
                    .await;
                return None;
            }
        }
    }

    Some(full)
}

#[derive(Clone)]
pub struct CoachService {
    db: Database,
    llm: Arc<dyn ChatProvider>,
    max_tokens: u32,
}

impl CoachService {
    pub fn new(db: Database, llm: Arc<dyn ChatProvider>, max_tokens: u32) -> Self {
        Self {
            db,
            llm,
            max_tokens,
        }
    }

    /// Persist the user turn, then stream the coach reply as SSE bytes.
    /// The assistant turn is stored once the stream finishes cleanly.
    pub async fn stream_reply(
        &self,
        user: User,
        conversation: Conversation,
        content: String,
    ) -> Result<impl Stream<Item = Result<Bytes, Infallible>>, AppError> {
        self.db
            .insert_message(&Message::new(
                conversation.id,
                MessageRole::User,
                content.clone(),
            ))
            .await?;

        let profile = self.db.get_health_profile(user.id).await?;
        let system = build_system_prompt(&user, profile.as_ref(), Utc::now().date_naive());
        let history = history_messages(
            &self
                .db
                .recent_history(conversation.id, MAX_HISTORY_MESSAGES)
                .await?,
        );

        let (tx, rx) = mpsc::channel(32);
        let service = self.clone();

        tokio::spawn(async move {
            let upstream = match service.llm.stream(Some(&system), &history, service.max_tokens).await {
                Ok(upstream) => upstream,
                Err(e) => {
                    tracing::error!(conversation_id = %conversation.id, error = %e, "Coach provider unavailable");
                    let _ = tx
                        .send(Ok(Bytes::from(sse_error_frame("Coach unavailable"))))
                        .await;
                    return;
                }
            };

            let Some(reply) = relay_stream(upstream, &tx).await else {
                return;
            };

            if let Err(e) = service.finish_turn(&conversation, &content, reply).await {
                tracing::error!(conversation_id = %conversation.id, error = %e, "Failed to save coach reply");
            }
            metrics::counter!("coach_messages_streamed_total").increment(1);

            let _ = tx.send(Ok(Bytes::from_static(DONE_FRAME.as_bytes()))).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn finish_turn(
        &self,
        conversation: &Conversation,
        user_message: &str,
        reply: String,
    ) -> Result<(), AppError> {
        let title = (conversation.title.is_none() && !reply.is_empty())
            .then(|| conversation_title(user_message));

        self.db
            .insert_message(&Message::new(conversation.id, MessageRole::Assistant, reply))
            .await?;
        self.db
            .touch_conversation(conversation.id, title.as_deref())
            .await
    }
}
