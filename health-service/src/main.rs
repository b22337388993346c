use health_service::{
    build_router,
    config::HealthConfig,
    db,
    pipeline::{
        executor::CommandExecutor, orchestrator::requeue_unfinished, text::PdfToText,
        LabPipeline, WorkerOrchestrator,
    },
    services::{
        create_storage,
        init_metrics,
        providers::{anthropic::AnthropicProvider, mistral::MistralOcrProvider, ChatProvider},
        Database, MemoryStateStore, RedisStateStore, StateStore,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_tracing, shutdown_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let config = HealthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting health service"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let db = Database::new(pool);

    let storage = create_storage(&config.storage).await?;

    let oauth_states: Arc<dyn StateStore> = match &config.redis {
        Some(redis) => Arc::new(
            RedisStateStore::connect(&redis.url).await?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set, OAuth state kept in process memory");
            Arc::new(MemoryStateStore::new())
        }
    };

    let llm: Arc<dyn ChatProvider> = Arc::new(AnthropicProvider::new(&config.anthropic));
    let text_source = Arc::new(PdfToText::new(
        CommandExecutor::new(Duration::from_secs(config.pipeline.pdftotext_timeout_seconds)),
        &config.pipeline.temp_dir,
    ));
    let pipeline = Arc::new(LabPipeline::new(
        text_source,
        Arc::new(MistralOcrProvider::new(&config.mistral)),
        llm.clone(),
        config.anthropic.extraction_max_tokens,
    ));

    let (orchestrator, jobs) = WorkerOrchestrator::new(
        config.pipeline.clone(),
        db.clone(),
        storage.clone(),
        pipeline,
    );
    let worker_shutdown = orchestrator.start();

    if config.pipeline.enabled {
        if let Err(e) = requeue_unfinished(&db, &jobs).await {
            tracing::error!(error = %e, "Failed to re-enqueue unfinished lab results");
        }
    }

    let state = AppState::new(config.clone(), db, storage, oauth_states, llm, jobs);
    let app = build_router(state);

    let addr: SocketAddr = config.common.bind_address().parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!(
            "Invalid bind address {}: {}",
            config.common.bind_address(),
            e
        ))
    })?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    worker_shutdown.cancel();
    shutdown_tracing();

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
