pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use service_core::middleware::{
    bot_detection::{bot_detection_middleware, BotDetectionConfig},
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::HealthConfig;
use crate::handlers::MAX_UPLOAD_BYTES;
use crate::pipeline::JobQueue;
use crate::services::providers::ChatProvider;
use crate::services::{
    CoachService, Database, GarminClient, GmailClient, GoogleOAuthClient, JwtService, StateStore,
    Storage,
};

#[derive(Clone)]
pub struct AppState {
    pub config: HealthConfig,
    pub db: Database,
    pub jwt: JwtService,
    pub storage: Arc<dyn Storage>,
    pub oauth_states: Arc<dyn StateStore>,
    pub google: GoogleOAuthClient,
    pub gmail: GmailClient,
    pub garmin: GarminClient,
    pub coach: CoachService,
    pub jobs: JobQueue,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub portal_login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
    pub bot_detection: BotDetectionConfig,
}

impl AppState {
    /// Wire the HTTP-facing services around the shared infrastructure.
    pub fn new(
        config: HealthConfig,
        db: Database,
        storage: Arc<dyn Storage>,
        oauth_states: Arc<dyn StateStore>,
        llm: Arc<dyn ChatProvider>,
        jobs: JobQueue,
    ) -> Self {
        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let register_rate_limiter =
            create_ip_rate_limiter(limits.register_attempts, limits.register_window_seconds);
        let portal_login_rate_limiter = create_ip_rate_limiter(
            limits.portal_login_attempts,
            limits.portal_login_window_seconds,
        );
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);

        let bot_detection = BotDetectionConfig::new([
            "/health".to_string(),
            "/ready".to_string(),
            "/metrics".to_string(),
            format!("{}/garmin/webhooks", config.api_prefix),
        ]);

        let google = GoogleOAuthClient::new(&config.google);

        Self {
            jwt: JwtService::new(&config.jwt),
            gmail: GmailClient::new(google.clone(), db.clone()),
            garmin: GarminClient::new(&config.garmin),
            coach: CoachService::new(db.clone(), llm, config.anthropic.coach_max_tokens),
            google,
            db,
            storage,
            oauth_states,
            jobs,
            login_rate_limiter,
            register_rate_limiter,
            portal_login_rate_limiter,
            ip_rate_limiter,
            bot_detection,
            config,
        }
    }
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let portal_login_route = Router::new()
        .route("/portal/auth/login", post(handlers::portal::login))
        .layer(from_fn_with_state(
            state.portal_login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let upload_limit = DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024);

    let user_routes = Router::new()
        .route(
            "/users/me",
            get(handlers::users::get_me).patch(handlers::users::update_me),
        )
        .route(
            "/users/me/health-profile",
            put(handlers::users::update_health_profile),
        )
        .route(
            "/conversations",
            get(handlers::coach::list_conversations).post(handlers::coach::create_conversation),
        )
        .route(
            "/conversations/:id/messages",
            get(handlers::coach::list_messages).post(handlers::coach::send_message),
        )
        .route("/garmin/connect-url", get(handlers::garmin::connect_url))
        .route("/garmin/callback", post(handlers::garmin::callback))
        .route(
            "/garmin/connection",
            get(handlers::garmin::get_connection).delete(handlers::garmin::disconnect),
        )
        .route("/garmin/data", get(handlers::garmin::get_data))
        .route("/garmin/sync", post(handlers::garmin::sync))
        .route(
            "/lab/orders",
            get(handlers::labs::list_orders).post(handlers::labs::create_order),
        )
        .route("/lab/results", get(handlers::labs::list_results))
        .route(
            "/lab/results/upload",
            post(handlers::labs::upload_result).layer(upload_limit.clone()),
        )
        .route("/lab/results/:id", get(handlers::labs::get_result))
        .route("/lab/results/:id/pdf-url", get(handlers::labs::pdf_url))
        .route(
            "/lab/biomarkers/:code/history",
            get(handlers::labs::biomarker_history),
        )
        .route("/lab/import/gmail", post(handlers::labs::import_gmail))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let portal_routes = Router::new()
        .route("/portal/orders", get(handlers::portal::list_orders))
        .route(
            "/portal/orders/:id/results",
            post(handlers::portal::upload_result).layer(upload_limit),
        )
        .route(
            "/portal/results/:id/review",
            post(handlers::portal::review_result),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::portal_auth_middleware,
        ));

    Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/google/url", get(handlers::auth::google_url))
        .route("/auth/google/callback", post(handlers::auth::google_callback))
        .route("/lab/panels", get(handlers::labs::list_panels))
        .route("/garmin/webhooks", post(handlers::garmin::webhook))
        .merge(login_route)
        .merge(register_route)
        .merge(portal_login_route)
        .merge(user_routes)
        .merge(portal_routes)
}

pub fn build_router(state: AppState) -> Router {
    let api = api_routes(&state);
    let prefix = state.config.api_prefix.trim_end_matches('/');

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint));

    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(prefix, api)
    };

    app.with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn_with_state(
            state.bot_detection.clone(),
            bot_detection_middleware,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origins(&state.config.security.allowed_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
}

/// `*` (dev only) allows any origin; unparsable entries are skipped.
fn cors_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    AllowOrigin::list(parsed)
}
