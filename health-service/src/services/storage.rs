use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use service_core::error::AppError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::config::{StorageBackend, StorageConfig};

/// Blob store for uploaded lab PDFs.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError>;
    async fn download(&self, key: &str) -> Result<Vec<u8>, AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    /// Time-limited GET URL for `key`.
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String, AppError>;
}

pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, AppError> {
    match config.backend {
        StorageBackend::Local => {
            tracing::info!(path = %config.local_path, "Using local file storage");
            Ok(Arc::new(LocalStorage::new(&config.local_path).await?))
        }
        StorageBackend::S3 => {
            tracing::info!(bucket = %config.bucket, region = %config.region, "Using S3 storage");
            let aws = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(config.region.clone()))
                .load()
                .await;
            Ok(Arc::new(S3Storage::new(
                S3Client::new(&aws),
                config.bucket.clone(),
            )))
        }
    }
}

/// Reduce a client-supplied file name to its final path component so it can be
/// embedded in a storage key.
pub fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => "upload.pdf".to_string(),
        other => other.to_string(),
    }
}

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::bad_request("Invalid storage key"));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let path = self.path_for(key)?;
        Ok(fs::read(path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn presigned_url(&self, key: &str, _expires_in: Duration) -> Result<String, AppError> {
        let path = self.path_for(key)?;
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(format!("file://{}", absolute.display()))
    }
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/pdf")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("S3 upload failed: {}", e)))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("S3 download failed: {}", e)))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("S3 body collection failed: {}", e))
            })?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("S3 delete failed: {}", e)))?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String, AppError> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Invalid presign expiry: {}", e))
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("S3 presign failed: {}", e)))?;

        Ok(request.uri().to_string())
    }
}
