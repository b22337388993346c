use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::utils::validation::trimmed;

#[derive(Debug, Deserialize, Validate)]
pub struct PortalLoginRequest {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 16))]
    pub code_prefix: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct PortalTokenResponse {
    pub access_token: String,
    pub partner_id: Uuid,
    pub partner_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PortalOrdersQuery {
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub result_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 256, message = "Reviewer is required"))]
    pub reviewer: String,
}
