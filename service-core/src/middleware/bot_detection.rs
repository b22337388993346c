use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use isbot::Bots;
use std::sync::Arc;
use tracing::warn;

/// Paths that skip scoring. Entries ending in `/` match as prefixes.
#[derive(Clone, Debug)]
pub struct BotDetectionConfig {
    pub exempt_paths: Arc<Vec<String>>,
}

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self::new(["/health", "/ready", "/metrics"])
    }
}

impl BotDetectionConfig {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exempt_paths: Arc::new(paths.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| {
            if p.ends_with('/') {
                path.starts_with(p.as_str())
            } else {
                path == p
            }
        })
    }
}

fn bot_score(bots: &Bots, headers: &HeaderMap) -> u32 {
    let user_agent = headers
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if user_agent.is_empty() {
        return 50;
    }

    let mut score = 0;
    if bots.is_bot(user_agent) {
        score += 100;
    }

    if user_agent.starts_with("Mozilla/") {
        let missing_headers = ["Accept", "Accept-Language", "Accept-Encoding"]
            .iter()
            .filter(|h| !headers.contains_key(**h))
            .count();

        if missing_headers >= 2 {
            score += 70;
        } else if missing_headers == 1 {
            score += 30;
        }
    }

    score
}

pub async fn bot_detection_middleware(
    State(config): State<BotDetectionConfig>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if request.method() == Method::OPTIONS || config.is_exempt(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let score = bot_score(&Bots::default(), &headers);

    if score >= 100 {
        let user_agent = headers
            .get("User-Agent")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        warn!(
            user_agent = %user_agent,
            score = %score,
            path = %request.uri(),
            "Blocking suspected bot request"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!("Bot detected")));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exempt_prefixes() {
        let config = BotDetectionConfig::new(["/health", "/api/v1/garmin/webhook/"]);
        assert!(config.is_exempt("/health"));
        assert!(!config.is_exempt("/healthz"));
        assert!(config.is_exempt("/api/v1/garmin/webhook/dailies"));
        assert!(!config.is_exempt("/api/v1/garmin/data"));
    }

    #[test]
    fn test_scores() {
        let bots = Bots::default();
        let mut headers = HeaderMap::new();
        assert_eq!(bot_score(&bots, &headers), 50);

        headers.insert("User-Agent", "Googlebot/2.1".parse().unwrap());
        assert!(bot_score(&bots, &headers) >= 100);

        let mut headers = HeaderMap::new();
        headers.insert(
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .parse()
                .unwrap(),
        );
        assert_eq!(bot_score(&bots, &headers), 70);
        headers.insert("Accept", "*/*".parse().unwrap());
        headers.insert("Accept-Language", "es-ES".parse().unwrap());
        headers.insert("Accept-Encoding", "gzip".parse().unwrap());
        assert_eq!(bot_score(&bots, &headers), 0);
    }
}
