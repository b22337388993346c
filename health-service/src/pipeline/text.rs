use super::executor::CommandExecutor;
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

/// Below this many characters of extracted text a PDF is treated as scanned.
pub const SCANNED_TEXT_THRESHOLD: usize = 50;

pub fn is_scanned(text: &str) -> bool {
    text.trim().chars().count() < SCANNED_TEXT_THRESHOLD
}

/// Digital text layer of a PDF.
#[async_trait]
pub trait PdfTextSource: Send + Sync {
    async fn extract_text(&self, pdf: &[u8]) -> Result<String, anyhow::Error>;
}

/// `pdftotext <file> -` on a temp copy of the PDF.
pub struct PdfToText {
    executor: CommandExecutor,
    temp_dir: PathBuf,
}

impl PdfToText {
    pub fn new(executor: CommandExecutor, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            temp_dir: temp_dir.into(),
        }
    }
}

#[async_trait]
impl PdfTextSource for PdfToText {
    async fn extract_text(&self, pdf: &[u8]) -> Result<String, anyhow::Error> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let path = self.temp_dir.join(format!("{}.pdf", Uuid::new_v4()));
        tokio::fs::write(&path, pdf).await?;

        let path_str = path.to_string_lossy().to_string();
        let result = self.executor.execute("pdftotext", &[&path_str, "-"]).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!(path = %path_str, error = %e, "Failed to remove temp PDF");
        }

        let output = result.map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanned_threshold() {
        assert!(is_scanned(""));
        assert!(is_scanned("   \n\n  Page 1  \n"));
        assert!(is_scanned(&"x".repeat(49)));
        assert!(!is_scanned(&"x".repeat(50)));
        // whitespace around the text does not count
        assert!(is_scanned(&format!("   {}   ", "y".repeat(49))));
    }

    #[test]
    fn test_threshold_counts_characters_not_bytes() {
        assert!(is_scanned(&"ñ".repeat(49)));
        assert!(!is_scanned(&"ñ".repeat(50)));
    }
}
