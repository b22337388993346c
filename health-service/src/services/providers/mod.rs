//! External AI backends behind traits, so handlers and the pipeline can run
//! against mocks in tests.

pub mod anthropic;
pub mod mistral;
pub mod mock;

use async_trait::async_trait;
use serde::Serialize;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// One turn of a conversation as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    /// Final chunk with usage stats.
    Complete { input_tokens: u32, output_tokens: u32 },
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Text generation (coach replies and structured extraction).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ProviderError>;

    async fn stream(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<ProviderStream, ProviderError>;
}

/// OCR for scanned PDFs. Returns the recognised text, pages joined by newlines.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn ocr_pdf(&self, pdf: &[u8]) -> Result<String, ProviderError>;
}

pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}
