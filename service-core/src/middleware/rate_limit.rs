use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Allows `attempts` requests per `window_seconds` per IP, refilled evenly.
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period_ms = (window_seconds.max(1) * 1000) / attempts.get() as u64;
    let period = Duration::from_millis(period_ms.max(1));

    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(attempts))
        .allow_burst(attempts);

    Arc::new(RateLimiter::dashmap(quota))
}

fn client_ip(request: &Request) -> Option<IpAddr> {
    let forwarded_ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded_ip.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(&request) {
        Some(ip) => match limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(limiter: IpRateLimiter) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                limiter,
                ip_rate_limit_middleware,
            ))
    }

    fn request(ip: &str) -> Request {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_blocks_after_burst() {
        let limiter = create_ip_rate_limiter(2, 60);
        let app = app(limiter);

        for _ in 0..2 {
            let res = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));

        let res = app.oneshot(request("10.0.0.2")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
