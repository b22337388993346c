#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use health_service::config::HealthConfig;
use health_service::db;
use health_service::pipeline::text::PdfTextSource;
use health_service::pipeline::{JobQueue, LabPipeline, WorkerOrchestrator};
use health_service::services::providers::mock::{MockChatProvider, MockOcrProvider};
use health_service::services::storage::LocalStorage;
use health_service::services::{Database, JwtService, MemoryStateStore, Storage, TokenKind};
use health_service::{build_router, AppState};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Stands in for `pdftotext` so tests do not need poppler installed.
pub struct NoTextLayer;

#[async_trait::async_trait]
impl PdfTextSource for NoTextLayer {
    async fn extract_text(&self, _pdf: &[u8]) -> Result<String, anyhow::Error> {
        Ok(String::new())
    }
}

/// Text layer with a fixed body, for driving the extraction workers.
pub struct FixedTextLayer(pub String);

#[async_trait::async_trait]
impl PdfTextSource for FixedTextLayer {
    async fn extract_text(&self, _pdf: &[u8]) -> Result<String, anyhow::Error> {
        Ok(self.0.clone())
    }
}

pub const TEST_JWT_SECRET: &str = "test-secret-for-integration-tests";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub jwt: JwtService,
    pub workers: CancellationToken,
    _storage_dir: TempDir,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.workers.cancel();
    }
}

pub fn test_config(storage_path: &str) -> HealthConfig {
    let mut config = HealthConfig::from_env().expect("Failed to load configuration");
    config.api_prefix = "/api/v1".to_string();
    config.jwt.secret = TEST_JWT_SECRET.to_string();
    config.storage.local_path = storage_path.to_string();
    config.pipeline.enabled = false;
    config.security.allowed_origins = vec!["http://localhost:3000".to_string()];
    config.rate_limit.global_ip_limit = 1000;
    config
}

impl TestApp {
    /// Router over a lazily connected pool. Requests that never reach
    /// Postgres work without a database.
    pub async fn spawn() -> Self {
        Self::spawn_with_chat(MockChatProvider::new(&["Hola", ", ¿en qué te ayudo?"])).await
    }

    pub async fn spawn_with_chat(chat: MockChatProvider) -> Self {
        let storage_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&storage_dir.path().to_string_lossy());
        let pool = db::create_lazy_pool(&config.database).expect("Failed to build lazy pool");
        Self::build(config, pool, storage_dir, chat, Arc::new(NoTextLayer)).await
    }

    /// Router over a migrated database at `DATABASE_URL`.
    pub async fn spawn_migrated(chat: MockChatProvider) -> Self {
        let storage_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&storage_dir.path().to_string_lossy());
        let pool = migrated_pool(&config).await;
        Self::build(config, pool, storage_dir, chat, Arc::new(NoTextLayer)).await
    }

    /// Migrated database with the extraction workers running. Every PDF
    /// reads as `text`; `chat` answers the extraction call.
    pub async fn spawn_with_pipeline(chat: MockChatProvider, text: &str) -> Self {
        let storage_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = test_config(&storage_dir.path().to_string_lossy());
        config.pipeline.enabled = true;
        config.pipeline.worker_count = 2;
        let pool = migrated_pool(&config).await;
        Self::build(
            config,
            pool,
            storage_dir,
            chat,
            Arc::new(FixedTextLayer(text.to_string())),
        )
        .await
    }

    async fn build(
        config: HealthConfig,
        pool: sqlx::PgPool,
        storage_dir: TempDir,
        chat: MockChatProvider,
        text_source: Arc<dyn PdfTextSource>,
    ) -> Self {
        let db = Database::new(pool);

        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(storage_dir.path())
                .await
                .expect("Failed to init storage"),
        );

        let llm = Arc::new(chat);
        let pipeline = Arc::new(LabPipeline::new(
            text_source,
            Arc::new(MockOcrProvider::failing()),
            llm.clone(),
            config.anthropic.extraction_max_tokens,
        ));

        let (orchestrator, jobs): (WorkerOrchestrator, JobQueue) = WorkerOrchestrator::new(
            config.pipeline.clone(),
            db.clone(),
            storage.clone(),
            pipeline,
        );

        let workers = orchestrator.start();

        let state = AppState::new(
            config.clone(),
            db,
            storage,
            Arc::new(MemoryStateStore::new()),
            llm,
            jobs,
        );

        TestApp {
            router: build_router(state.clone()),
            jwt: JwtService::new(&config.jwt),
            state,
            workers,
            _storage_dir: storage_dir,
        }
    }

    pub fn token(&self, subject: Uuid, kind: TokenKind) -> String {
        self.jwt
            .issue(&subject.to_string(), kind)
            .expect("Failed to issue token")
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        use tower::ServiceExt;
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed")
    }

    pub async fn get(&self, path: &str, bearer: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn send_json(
        &self,
        method: &str,
        path: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Response {
        self.send_json("POST", path, body, bearer).await
    }

    /// Single-file multipart body under the `file` field.
    pub async fn post_file(
        &self,
        path: &str,
        filename: &str,
        data: &[u8],
        bearer: &str,
    ) -> Response {
        let boundary = "nove-test-boundary";
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: application/pdf\r\n\r\n",
            b = boundary,
            f = filename
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        self.request(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

async fn migrated_pool(config: &HealthConfig) -> sqlx::PgPool {
    let pool = db::create_pool(&config.database)
        .await
        .expect("Failed to connect to PostgreSQL");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn assert_error(response: Response, status: StatusCode, message: &str) {
    assert_eq!(response.status(), status);
    let body = body_json(response).await;
    assert_eq!(body["error"], message);
}
