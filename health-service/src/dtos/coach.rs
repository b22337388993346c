use crate::models::ConversationType;
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ConversationCreate {
    #[validate(length(max = 256))]
    pub title: Option<String>,
    #[serde(default)]
    pub conversation_type: ConversationType,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MessageCreate {
    #[validate(length(min = 1, max = 10000, message = "Message must be 1-10000 characters"))]
    pub content: String,
}
