//! Mistral OCR: the whole PDF goes up as a base64 data URL, page markdown
//! comes back.

use super::{http_client, OcrProvider, ProviderError};
use crate::config::MistralConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

pub struct MistralOcrProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl MistralOcrProvider {
    pub fn new(config: &MistralConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.ocr_model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: http_client(180),
        }
    }

    fn request_body(&self, pdf: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "document": {
                "type": "document_url",
                "document_url": format!("data:application/pdf;base64,{}", STANDARD.encode(pdf)),
            },
        })
    }
}

#[async_trait]
impl OcrProvider for MistralOcrProvider {
    async fn ocr_pdf(&self, pdf: &[u8]) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Mistral API key not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(format!("{}/v1/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(pdf))
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }
            return Err(ProviderError::ApiError(format!(
                "Mistral OCR error {}: {}",
                status, error_text
            )));
        }

        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse OCR response: {}", e)))?;

        Ok(join_pages(body.pages))
    }
}

fn join_pages(pages: Vec<OcrPage>) -> String {
    pages
        .into_iter()
        .map(|p| p.markdown)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: String,
}
