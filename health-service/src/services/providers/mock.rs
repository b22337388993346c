//! Canned providers for tests and local runs without API keys.

use super::{ChatMessage, ChatProvider, OcrProvider, ProviderError, ProviderStream, StreamChunk};
use async_trait::async_trait;
use std::sync::Mutex;

/// Replies with a fixed text, streamed in the given pieces. Records the last
/// system prompt and message list it was called with.
pub struct MockChatProvider {
    chunks: Vec<String>,
    fail_after: Option<usize>,
    pub last_system: Mutex<Option<String>>,
    pub last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockChatProvider {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_after: None,
            last_system: Mutex::new(None),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    /// Streams `n` chunks, then yields an error.
    pub fn failing_after(chunks: &[&str], n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(chunks)
        }
    }

    fn record(&self, system: Option<&str>, messages: &[ChatMessage]) {
        if let Ok(mut s) = self.last_system.lock() {
            *s = system.map(str::to_string);
        }
        if let Ok(mut m) = self.last_messages.lock() {
            *m = messages.to_vec();
        }
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<String, ProviderError> {
        self.record(system, messages);
        if self.fail_after.is_some() {
            return Err(ProviderError::ApiError("Mock failure".to_string()));
        }
        Ok(self.chunks.concat())
    }

    async fn stream(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<ProviderStream, ProviderError> {
        self.record(system, messages);

        let mut items: Vec<Result<StreamChunk, ProviderError>> = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if self.fail_after == Some(i) {
                items.push(Err(ProviderError::NetworkError(
                    "Mock stream interrupted".to_string(),
                )));
                return Ok(Box::pin(tokio_stream::iter(items)));
            }
            items.push(Ok(StreamChunk::Text(chunk.clone())));
        }
        if let Some(n) = self.fail_after {
            if n >= self.chunks.len() {
                items.push(Err(ProviderError::NetworkError(
                    "Mock stream interrupted".to_string(),
                )));
                return Ok(Box::pin(tokio_stream::iter(items)));
            }
        }
        items.push(Ok(StreamChunk::Complete {
            input_tokens: 10,
            output_tokens: self.chunks.len() as u32,
        }));

        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

pub struct MockOcrProvider {
    text: Option<String>,
}

impl MockOcrProvider {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl OcrProvider for MockOcrProvider {
    async fn ocr_pdf(&self, _pdf: &[u8]) -> Result<String, ProviderError> {
        self.text
            .clone()
            .ok_or_else(|| ProviderError::ApiError("Mock OCR failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_chunks_then_complete() {
        let provider = MockChatProvider::new(&["Hola", " mundo"]);
        let mut stream = provider
            .stream(Some("sys"), &[ChatMessage::user("hi")], 100)
            .await
            .unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamChunk::Text("Hola".into())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamChunk::Text(" mundo".into())
        );
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamChunk::Complete { .. }
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(provider.last_system.lock().unwrap().as_deref(), Some("sys"));
    }

    #[tokio::test]
    async fn test_stream_failure() {
        let provider = MockChatProvider::failing_after(&["a", "b"], 1);
        let items: Vec<_> = provider.stream(None, &[], 1).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
