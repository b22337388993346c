pub mod auth;
pub mod coach;
pub mod garmin;
pub mod health;
pub mod labs;
pub mod metrics;
pub mod portal;
pub mod users;

use axum::extract::Multipart;
use service_core::error::AppError;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_endpoint;

/// Upper bound for a single uploaded lab PDF.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// First file field of a multipart body. Only `.pdf` file names are accepted.
pub(crate) async fn read_pdf_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart field: {}", e))
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        if !is_pdf_name(&filename) {
            return Err(AppError::bad_request("Only PDF files accepted"));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Failed to read file bytes: {}", e)))?
            .to_vec();

        if data.is_empty() {
            return Err(AppError::bad_request("Uploaded file is empty"));
        }
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::bad_request("File too large (max 20MB)"));
        }

        return Ok((filename, data));
    }

    Err(AppError::bad_request("No file uploaded"))
}

fn is_pdf_name(filename: &str) -> bool {
    filename.to_lowercase().ends_with(".pdf")
}
