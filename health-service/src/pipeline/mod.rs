//! Lab PDF ingestion: text layer or OCR, LLM extraction, validation and
//! confidence routing. [`orchestrator`] runs it on a worker pool.

pub mod executor;
pub mod extraction;
pub mod orchestrator;
pub mod text;
pub mod validation;

pub use orchestrator::{ExtractionJob, JobQueue, WorkerOrchestrator};
pub use validation::{
    biomarker_status, expected_codes, route_by_confidence, validate_extraction,
    ExtractedBiomarker,
};

use crate::models::ProcessingStatus;
use crate::services::providers::{ChatProvider, OcrProvider};
use std::sync::Arc;
use text::PdfTextSource;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub biomarkers: Vec<ExtractedBiomarker>,
    pub confidence: f64,
    pub status: ProcessingStatus,
}

impl PipelineOutcome {
    fn no_text() -> Self {
        Self {
            biomarkers: Vec::new(),
            confidence: 0.0,
            status: ProcessingStatus::Failed,
        }
    }
}

pub struct LabPipeline {
    text_source: Arc<dyn PdfTextSource>,
    ocr: Arc<dyn OcrProvider>,
    llm: Arc<dyn ChatProvider>,
    extraction_max_tokens: u32,
}

impl LabPipeline {
    pub fn new(
        text_source: Arc<dyn PdfTextSource>,
        ocr: Arc<dyn OcrProvider>,
        llm: Arc<dyn ChatProvider>,
        extraction_max_tokens: u32,
    ) -> Self {
        Self {
            text_source,
            ocr,
            llm,
            extraction_max_tokens,
        }
    }

    /// Run one PDF through the pipeline. Text and OCR failures degrade to
    /// empty text (and a `failed` outcome); an extraction call failure is an
    /// error for the caller to handle.
    pub async fn process_pdf(
        &self,
        pdf: &[u8],
        expected: &[String],
        result_id: Uuid,
    ) -> Result<PipelineOutcome, anyhow::Error> {
        let mut text = match self.text_source.extract_text(pdf).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(result_id = %result_id, error = %e, "PDF text extraction failed");
                String::new()
            }
        };

        if text::is_scanned(&text) {
            tracing::info!(result_id = %result_id, "Scanned PDF detected, running OCR");
            text = match self.ocr.ocr_pdf(pdf).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(result_id = %result_id, error = %e, "OCR failed");
                    String::new()
                }
            };
        }

        if text.trim().is_empty() {
            tracing::warn!(result_id = %result_id, "No text extracted from PDF");
            return Ok(PipelineOutcome::no_text());
        }

        let raw =
            extraction::extract_biomarkers(self.llm.as_ref(), &text, self.extraction_max_tokens)
                .await
                .map_err(|e| anyhow::anyhow!("Biomarker extraction failed: {}", e))?;

        let (biomarkers, confidence) = validate_extraction(raw, expected);
        let status = route_by_confidence(confidence);

        tracing::info!(
            result_id = %result_id,
            biomarker_count = biomarkers.len(),
            confidence,
            status = status.as_str(),
            "PDF processed"
        );

        Ok(PipelineOutcome {
            biomarkers,
            confidence,
            status,
        })
    }
}
