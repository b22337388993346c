use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use service_core::error::AppError;
use validator::Validate;

/// JSON body that must also pass its `validator` rules.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// `deserialize_with` helper: strips surrounding whitespace so length rules
/// apply to the trimmed value.
pub fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value.trim().to_string())
}
