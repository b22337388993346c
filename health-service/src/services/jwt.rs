use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;

/// Which audience a token was minted for. User endpoints accept only
/// `Access`, portal endpoints only `Portal`, `/auth/refresh` only `Refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Portal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id, or partner id for portal tokens
    pub sub: String,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl Claims {
    pub fn subject_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

/// HS256 signer and verifier for all three token kinds.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    portal_token_expiry_hours: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            portal_token_expiry_hours: config.portal_token_expiry_hours,
        }
    }

    fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => Duration::minutes(self.access_token_expiry_minutes),
            TokenKind::Refresh => Duration::days(self.refresh_token_expiry_days),
            TokenKind::Portal => Duration::hours(self.portal_token_expiry_hours),
        }
    }

    pub fn issue(&self, subject: &str, kind: TokenKind) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            typ: kind,
            exp: (now + self.lifetime(kind)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {:?} token: {}", kind, e))
    }

    pub fn generate_token_pair(&self, user_id: Uuid) -> Result<TokenResponse, anyhow::Error> {
        let subject = user_id.to_string();
        Ok(TokenResponse {
            access_token: self.issue(&subject, TokenKind::Access)?,
            refresh_token: self.issue(&subject, TokenKind::Refresh)?,
            token_type: "bearer".to_string(),
        })
    }

    /// Decode and check signature, expiry and `typ`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid token: {}", e))?;

        if data.claims.typ != expected {
            return Err(anyhow::anyhow!(
                "Expected {:?} token, got {:?}",
                expected,
                data.claims.typ
            ));
        }

        Ok(data.claims)
    }
}
