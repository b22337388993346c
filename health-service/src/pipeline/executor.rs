use service_core::error::AppError;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Runs external tools (`pdftotext`) with a hard timeout.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn execute(&self, program: &str, args: &[&str]) -> Result<Output, AppError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            program = %program,
            args = ?args,
            timeout_secs = self.timeout.as_secs(),
            "Executing command"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::InternalError(anyhow::anyhow!(
                    "{} timed out after {} seconds",
                    program,
                    self.timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(program = %program, stderr = %stderr, "Command failed");
            return Err(AppError::InternalError(anyhow::anyhow!(
                "{} failed: {}",
                program,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        assert!(executor
            .execute("definitely-not-a-real-binary-xyz", &[])
            .await
            .is_err());
    }
}
