//! Structured biomarker extraction from lab report text via the LLM.

use crate::services::providers::{ChatMessage, ChatProvider, ProviderError};
use serde_json::Value;

pub const EXTRACTION_PROMPT: &str = "\
You are a medical lab result extraction system. Extract all biomarker values from \
the following lab report text.

For each biomarker found, provide:
- biomarker_code: A standardized short code \
(e.g., GLU, HBA1C, TSH, TC, HDL, LDL, TG, CRE, BUN, AST, ALT, \
CBC_WBC, CBC_RBC, CBC_HGB, CBC_PLT, VIT_D, VIT_B12, FE, FERR)
- biomarker_name: Full name in Spanish
- value: Numeric value (convert to standard units if needed)
- unit: Unit of measurement
- reference_range_low: Lower bound of reference range (null if not provided)
- reference_range_high: Upper bound of reference range (null if not provided)
- confidence: Your confidence in this extraction from 0.0 to 1.0

Respond with a JSON array of objects. If you cannot extract any biomarkers, return an empty array.
Only include biomarkers where you can clearly identify a numeric value.";

pub fn build_extraction_message(text: &str) -> String {
    format!("{}\n\n---\n\nLab Report Text:\n{}", EXTRACTION_PROMPT, text)
}

/// Pull the payload out of a ```` ```json ```` block, or failing that the first
/// ```` ``` ```` block. Text without fences is returned as is.
pub fn strip_code_fence(content: &str) -> &str {
    if let Some((_, rest)) = content.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some((_, rest)) = content.split_once("```") {
        return rest.split("```").next().unwrap_or(rest);
    }
    content
}

/// Parse the model reply into raw biomarker objects. Anything that is not a
/// JSON array yields an empty list.
pub fn parse_biomarker_array(content: &str) -> Vec<Value> {
    let payload = strip_code_fence(content).trim();
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            tracing::error!(
                kind = json_kind(&other),
                "Extraction reply is not a JSON array"
            );
            Vec::new()
        }
        Err(e) => {
            let preview: String = content.chars().take(500).collect();
            tracing::error!(error = %e, response = %preview, "Failed to parse extraction reply");
            Vec::new()
        }
    }
}

pub async fn extract_biomarkers(
    provider: &dyn ChatProvider,
    text: &str,
    max_tokens: u32,
) -> Result<Vec<Value>, ProviderError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let reply = provider
        .complete(
            None,
            &[ChatMessage::user(build_extraction_message(text))],
            max_tokens,
        )
        .await?;

    Ok(parse_biomarker_array(&reply))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
