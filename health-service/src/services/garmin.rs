//! Garmin Health API: OAuth 2.0 with PKCE, wellness backfill and push ingest.

use crate::config::GarminConfig;
use crate::models::GarminConnection;
use crate::services::database::Database;
use crate::services::providers::http_client;
use crate::services::state_store::{StateStore, OAUTH_STATE_TTL_SECONDS};
use crate::utils::pkce;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use service_core::error::AppError;
use uuid::Uuid;

pub const AUTH_URL: &str = "https://connect.garmin.com/oauth2Confirm";
pub const TOKEN_URL: &str = "https://diauth.garmin.com/di-oauth2-service/oauth/token";
pub const USER_ID_URL: &str = "https://apis.garmin.com/wellness-api/rest/user/id";
pub const WELLNESS_BASE: &str = "https://healthapi.garmin.com/wellness-api/rest";

/// Tokens expiring within this window are refreshed before use.
const TOKEN_REFRESH_MARGIN_MINUTES: i64 = 5;
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Data types the backfill pulls, with their wellness API paths.
pub const SYNC_TYPES: [(&str, &str); 4] = [
    ("activity", "/dailies"),
    ("sleep", "/sleep"),
    ("stress", "/stressDetails"),
    ("vo2max", "/userMetrics"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct GarminTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl GarminTokens {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN))
    }
}

#[derive(Clone)]
pub struct GarminClient {
    config: GarminConfig,
    client: reqwest::Client,
}

impl GarminClient {
    pub fn new(config: &GarminConfig) -> Self {
        Self {
            config: config.clone(),
            client: http_client(30),
        }
    }

    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            AUTH_URL,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    /// New PKCE pair; the verifier is kept in `store` under the returned
    /// state, scoped to the user who started the flow.
    pub async fn begin_authorization(
        &self,
        store: &dyn StateStore,
        user_id: Uuid,
    ) -> Result<(String, String), AppError> {
        let state = pkce::random_token(32);
        let verifier = pkce::generate_code_verifier();
        store
            .put(&state_key(user_id, &state), &verifier, OAUTH_STATE_TTL_SECONDS)
            .await?;

        let url = self.authorization_url(&state, &pkce::code_challenge(&verifier));
        Ok((url, state))
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<GarminTokens, anyhow::Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&params).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<GarminTokens, anyhow::Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<GarminTokens, anyhow::Error> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<GarminTokens>().await?)
    }

    pub async fn fetch_user_id(&self, access_token: &str) -> Result<String, anyhow::Error> {
        let body: Value = self
            .client
            .get(USER_ID_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        user_id_of(&body).ok_or_else(|| anyhow::anyhow!("Garmin user id missing from response"))
    }

    /// Access token good for at least five more minutes, refreshing and
    /// persisting a new pair when needed.
    pub async fn valid_access_token(
        &self,
        db: &Database,
        connection: &GarminConnection,
    ) -> Result<String, AppError> {
        if connection.token_valid_for(chrono::Duration::minutes(TOKEN_REFRESH_MARGIN_MINUTES)) {
            return Ok(connection.access_token.clone());
        }

        tracing::info!(user_id = %connection.user_id, "Refreshing Garmin token");
        let tokens = self.refresh(&connection.refresh_token).await.map_err(|e| {
            tracing::error!(user_id = %connection.user_id, error = %e, "Garmin token refresh failed");
            AppError::BadGateway("Failed to refresh Garmin token".to_string())
        })?;

        let refresh_token = tokens
            .refresh_token
            .clone()
            .unwrap_or_else(|| connection.refresh_token.clone());
        db.update_garmin_tokens(
            connection.user_id,
            &tokens.access_token,
            &refresh_token,
            tokens.expires_at(),
        )
        .await?;

        Ok(tokens.access_token)
    }

    /// Summaries uploaded in `[start, end]` (unix seconds) from one wellness path.
    pub async fn fetch_summaries(
        &self,
        access_token: &str,
        path: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Value>, anyhow::Error> {
        let body: Value = self
            .client
            .get(format!("{}{}", WELLNESS_BASE, path))
            .bearer_auth(access_token)
            .query(&[
                ("uploadStartTimeInSeconds", start.to_string()),
                ("uploadEndTimeInSeconds", end.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(match body {
            Value::Array(items) => items,
            other => vec![other],
        })
    }

    /// Backfill the last `days` days of every sync type. Returns points stored.
    pub async fn sync(
        &self,
        db: &Database,
        connection: &GarminConnection,
        days: i64,
    ) -> Result<usize, AppError> {
        let token = self.valid_access_token(db, connection).await?;
        let end = Utc::now().timestamp();
        let start = end - days * 86_400;

        let mut stored = 0;
        for (data_type, path) in SYNC_TYPES {
            let summaries = self
                .fetch_summaries(&token, path, start, end)
                .await
                .map_err(|e| {
                    tracing::error!(user_id = %connection.user_id, data_type, error = %e, "Garmin sync fetch failed");
                    AppError::BadGateway(format!("Failed to fetch Garmin {} data", data_type))
                })?;
            stored += store_points(db, connection.user_id, data_type, &summaries).await?;
        }

        db.mark_garmin_synced(connection.user_id).await?;
        tracing::info!(user_id = %connection.user_id, days, stored, "Garmin sync complete");
        Ok(stored)
    }
}

/// Store key for a Garmin PKCE verifier.
pub fn state_key(user_id: Uuid, state: &str) -> String {
    format!("garmin:{}:{}", user_id, state)
}

/// Push payload key to stored data type.
pub fn webhook_data_type(key: &str) -> Option<&'static str> {
    match key {
        "dailies" => Some("activity"),
        "sleep" => Some("sleep"),
        "stressDetails" => Some("stress"),
        "userMetrics" => Some("vo2max"),
        "activities" => Some("activity"),
        _ => None,
    }
}

/// `calendarDate`, else the UTC day of `startTimeInSeconds`.
pub fn summary_date(summary: &Value) -> Option<NaiveDate> {
    if let Some(date) = summary.get("calendarDate").and_then(Value::as_str) {
        return NaiveDate::parse_from_str(date, "%Y-%m-%d").ok();
    }
    summary
        .get("startTimeInSeconds")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.date_naive())
}

fn user_id_of(value: &Value) -> Option<String> {
    match value.get("userId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn store_points(
    db: &Database,
    user_id: Uuid,
    data_type: &str,
    summaries: &[Value],
) -> Result<usize, AppError> {
    let mut stored = 0;
    for summary in summaries {
        let Some(date) = summary_date(summary) else {
            continue;
        };
        db.upsert_data_point(user_id, data_type, date, summary).await?;
        stored += 1;
    }
    Ok(stored)
}

/// Ingest a push notification. Unknown keys, unknown users and undated
/// summaries are skipped.
pub async fn process_webhook(db: &Database, payload: &Value) -> Result<usize, AppError> {
    let Some(sections) = payload.as_object() else {
        return Ok(0);
    };

    let mut stored = 0;
    for (key, summaries) in sections {
        let (Some(data_type), Some(summaries)) = (webhook_data_type(key), summaries.as_array())
        else {
            continue;
        };

        for summary in summaries {
            let Some(garmin_user_id) = user_id_of(summary) else {
                continue;
            };

            let Some(connection) = db.find_garmin_connection_by_garmin_id(&garmin_user_id).await?
            else {
                tracing::warn!(garmin_user_id = %garmin_user_id, "Webhook for unknown Garmin user");
                continue;
            };

            let count = store_points(db, connection.user_id, data_type, std::slice::from_ref(summary)).await?;
            db.mark_garmin_synced(connection.user_id).await?;

            metrics::counter!("garmin_webhook_points_total", "data_type" => data_type)
                .increment(count as u64);
            stored += count;
        }
    }

    tracing::info!(
        types = ?sections.keys().collect::<Vec<_>>(),
        stored,
        "Garmin webhook processed"
    );
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_webhook_type_mapping() {
        assert_eq!(webhook_data_type("dailies"), Some("activity"));
        assert_eq!(webhook_data_type("activities"), Some("activity"));
        assert_eq!(webhook_data_type("sleep"), Some("sleep"));
        assert_eq!(webhook_data_type("stressDetails"), Some("stress"));
        assert_eq!(webhook_data_type("userMetrics"), Some("vo2max"));
        assert_eq!(webhook_data_type("epochs"), None);
    }

    #[test]
    fn test_summary_date() {
        assert_eq!(
            summary_date(&json!({"calendarDate": "2025-03-14", "startTimeInSeconds": 0})),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        // 2025-03-14T23:30:00Z
        assert_eq!(
            summary_date(&json!({"startTimeInSeconds": 1741995000})),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(summary_date(&json!({"steps": 1000})), None);
        assert_eq!(summary_date(&json!({"calendarDate": "14/03/2025"})), None);
    }

    #[test]
    fn test_user_id_forms() {
        assert_eq!(user_id_of(&json!({"userId": "abc"})).as_deref(), Some("abc"));
        assert_eq!(user_id_of(&json!({"userId": 42})).as_deref(), Some("42"));
        assert_eq!(user_id_of(&json!({"userId": ""})), None);
        assert_eq!(user_id_of(&json!({})), None);
    }

    #[test]
    fn test_authorization_url_carries_pkce() {
        let client = GarminClient::new(&GarminConfig {
            client_id: "garmin-client".into(),
            client_secret: "s".into(),
            redirect_uri: "https://app.nove.health/garmin/callback".into(),
        });
        let url = client.authorization_url("state-1", "challenge_abc");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("client_id=garmin-client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=state-1"));
        assert!(url.contains("code_challenge=challenge_abc"));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn test_begin_authorization_stores_verifier() {
        use crate::services::state_store::MemoryStateStore;

        let client = GarminClient::new(&GarminConfig {
            client_id: "c".into(),
            client_secret: "s".into(),
            redirect_uri: "http://localhost/cb".into(),
        });
        let store = MemoryStateStore::new();
        let user_id = Uuid::new_v4();
        let (url, state) = client.begin_authorization(&store, user_id).await.unwrap();

        assert!(store.take(&state).await.unwrap().is_none());
        assert!(store
            .take(&state_key(Uuid::new_v4(), &state))
            .await
            .unwrap()
            .is_none());

        let verifier = store.take(&state_key(user_id, &state)).await.unwrap().unwrap();
        assert!(url.contains(&pkce::code_challenge(&verifier)));
        assert!(store.take(&state_key(user_id, &state)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_key_does_not_reach_other_flows() {
        use crate::services::state_store::MemoryStateStore;

        let store = MemoryStateStore::new();
        store.put("google:abc", "1", 60).await.unwrap();

        let user_id = Uuid::new_v4();
        assert!(store
            .take(&state_key(user_id, "google:abc"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(state_key(user_id, "abc"), format!("garmin:{}:abc", user_id));
    }
}
