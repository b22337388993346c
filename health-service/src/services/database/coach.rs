use super::{db_error, Database};
use crate::models::{Conversation, Message, MessageRole};
use service_core::error::AppError;
use uuid::Uuid;

impl Database {
    pub async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, AppError> {
        sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, user_id, title, conversation_type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, title, conversation_type, created_at, updated_at
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.user_id)
        .bind(&conversation.title)
        .bind(&conversation.conversation_type)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to create conversation"))
    }

    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, title, conversation_type, created_at, updated_at \
             FROM conversations WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list conversations"))
    }

    /// Conversation owned by `user_id`; someone else's is reported as absent.
    pub async fn find_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Conversation>, AppError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, title, conversation_type, created_at, updated_at \
             FROM conversations WHERE id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load conversation"))
    }

    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, AppError> {
        sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, role, content, created_at \
             FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list messages"))
    }

    /// The newest `limit` non-system messages, returned oldest first.
    pub async fn recent_history(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let mut messages = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, role, content, created_at \
             FROM messages WHERE conversation_id = $1 AND role <> $2 \
             ORDER BY created_at DESC LIMIT $3",
        )
        .bind(conversation_id)
        .bind(MessageRole::System.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load conversation history"))?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn insert_message(&self, message: &Message) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) \
             VALUES ($1, $2, $3, $4, clock_timestamp())",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save message"))?;
        Ok(())
    }

    /// Bump `updated_at`, and set the title only when none is stored yet.
    pub async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        title_if_missing: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversations SET title = COALESCE(title, $2), updated_at = NOW() WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(title_if_missing)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update conversation"))?;
        Ok(())
    }
}
