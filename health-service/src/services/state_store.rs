//! Short-lived, single-use values keyed by OAuth `state` (PKCE verifiers).

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use service_core::error::AppError;
use std::time::{Duration, Instant};

pub const OAUTH_STATE_TTL_SECONDS: u64 = 600;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AppError>;

    /// Read and delete in one step; a value can be taken once.
    async fn take(&self, key: &str) -> Result<Option<String>, AppError>;
}

#[derive(Clone)]
pub struct RedisStateStore {
    manager: ConnectionManager,
}

impl RedisStateStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            AppError::RedisError(e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }

    fn namespaced(key: &str) -> String {
        format!("oauth_state:{}", key)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::namespaced(key))
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to store OAuth state");
                AppError::RedisError(e)
            })
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(Self::namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to read OAuth state");
                AppError::RedisError(e)
            })
    }
}

/// Process-local fallback when no Redis URL is configured.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AppError> {
        self.purge_expired();
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, (_, expires_at))| *expires_at > Instant::now())
            .map(|(_, (value, _))| value))
    }
}
