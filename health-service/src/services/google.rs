//! Google OAuth 2.0 for sign-in; the same grant carries Gmail read access.

use crate::config::GoogleOAuthConfig;
use crate::services::providers::http_client;
use serde::Deserialize;

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
pub const SCOPES: &str = "openid email profile https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuthClient {
    config: GoogleOAuthConfig,
    client: reqwest::Client,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuthClient {
    pub fn new(config: &GoogleOAuthConfig) -> Self {
        Self {
            config: config.clone(),
            client: http_client(30),
            token_url: TOKEN_URL.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
        }
    }

    /// Consent screen URL; offline access so a refresh token is issued.
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            AUTH_URL,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
        )
    }

    pub async fn exchange_code(&self, code: &str) -> Result<GoogleTokens, anyhow::Error> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        self.token_request(&params).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<GoogleTokens, anyhow::Error> {
        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<GoogleTokens, anyhow::Error> {
        let response = self.client.post(&self.token_url).form(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Google token endpoint rejected request");
            anyhow::bail!("Google token endpoint returned {}", status);
        }

        Ok(response.json::<GoogleTokens>().await?)
    }

    pub async fn user_info(&self, access_token: &str) -> Result<GoogleUserInfo, anyhow::Error> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Google userinfo request failed");
            anyhow::bail!("Google userinfo returned {}", status);
        }

        Ok(response.json::<GoogleUserInfo>().await?)
    }
}

/// Display name for a new Google account: the profile name, else the email local part.
pub fn default_display_name(info: &GoogleUserInfo) -> String {
    info.name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            info.email
                .split('@')
                .next()
                .unwrap_or(&info.email)
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GoogleOAuthClient {
        GoogleOAuthClient::new(&GoogleOAuthConfig {
            client_id: "client-123.apps.googleusercontent.com".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://app.nove.health/auth/google/callback".to_string(),
        })
    }

    #[test]
    fn test_authorization_url() {
        let url = client().authorization_url("st@te");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("client_id=client-123.apps.googleusercontent.com"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Fapp.nove.health%2Fauth%2Fgoogle%2Fcallback"
        ));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("gmail.readonly"));
        assert!(url.contains("state=st%40te"));
    }

    #[test]
    fn test_default_display_name() {
        let mut info = GoogleUserInfo {
            id: "1".to_string(),
            email: "maria.lopez@gmail.com".to_string(),
            name: Some("  María López ".to_string()),
        };
        assert_eq!(default_display_name(&info), "María López");

        info.name = None;
        assert_eq!(default_display_name(&info), "maria.lopez");

        info.name = Some("   ".to_string());
        assert_eq!(default_display_name(&info), "maria.lopez");
    }
}
