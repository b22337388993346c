//! Anthropic Messages API client.
//!
//! Non-streaming calls return the concatenated text blocks; streaming calls
//! parse the SSE event stream and forward `text_delta` chunks.

use super::{http_client, ChatMessage, ChatProvider, ProviderError, ProviderStream, StreamChunk};
use crate::config::AnthropicConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: &AnthropicConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: http_client(120),
        }
    }

    fn request<'a>(
        &'a self,
        system: Option<&'a str>,
        messages: &'a [ChatMessage],
        max_tokens: u32,
        stream: bool,
    ) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens,
            system,
            messages,
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Anthropic API key not configured".to_string(),
            ));
        }

        tracing::debug!(
            model = %self.model,
            message_count = body.messages.len(),
            stream = body.stream,
            "Sending request to Anthropic API"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }
            if status.as_u16() == 400 {
                return Err(ProviderError::InvalidRequest(error_text));
            }

            return Err(ProviderError::ApiError(format!(
                "Anthropic API error {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let response = self
            .send(&self.request(system, messages, max_tokens, false))
            .await?;

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        tracing::debug!(
            input_tokens = body.usage.input_tokens,
            output_tokens = body.usage.output_tokens,
            "Anthropic completion finished"
        );

        Ok(body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect())
    }

    async fn stream(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<ProviderStream, ProviderError> {
        let response = self
            .send(&self.request(system, messages, max_tokens, true))
            .await?;

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::NetworkError(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    let Some(parsed) = parse_sse_event(&event) else {
                        continue;
                    };

                    match parsed {
                        StreamEvent::MessageStart { message } => {
                            input_tokens = message.usage.input_tokens;
                        }
                        StreamEvent::ContentBlockDelta {
                            delta: Delta::TextDelta { text },
                        } => {
                            if !text.is_empty()
                                && tx.send(Ok(StreamChunk::Text(text))).await.is_err()
                            {
                                return;
                            }
                        }
                        StreamEvent::MessageDelta { usage } => {
                            output_tokens = usage.output_tokens;
                        }
                        StreamEvent::Error { error } => {
                            let _ = tx
                                .send(Err(ProviderError::ApiError(format!(
                                    "{}: {}",
                                    error.kind, error.message
                                ))))
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            let _ = tx
                .send(Ok(StreamChunk::Complete {
                    input_tokens,
                    output_tokens,
                }))
                .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as ProviderStream)
    }
}

/// Splits a byte stream into complete SSE frames. Bytes are only decoded
/// once a frame is complete, so multibyte characters split across network
/// chunks survive intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            frames.push(String::from_utf8_lossy(&frame[..end]).into_owned());
        }
        frames
    }
}

/// Parse one SSE frame (`event:` / `data:` lines) into a typed event.
/// Frames without a `data:` line or with an unknown shape yield `None`.
fn parse_sse_event(frame: &str) -> Option<StreamEvent> {
    let data: String = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.trim_start())
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(&data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::trace!(error = %e, "Skipping unrecognised SSE frame");
            None
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Usage,
    },
    Error {
        error: ApiErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}
