use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_DAYS: i64 = 7;

fn default_days() -> i64 {
    DEFAULT_DAYS
}

fn default_data_type() -> String {
    "activity".to_string()
}

#[derive(Debug, Serialize)]
pub struct ConnectUrlResponse {
    pub url: String,
    pub state: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GarminCallbackRequest {
    #[validate(length(min = 1))]
    pub code: String,
    #[validate(length(min = 1))]
    pub state: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DataQuery {
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default = "default_days")]
    #[validate(range(min = 1, max = 365))]
    pub days: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SyncRequest {
    #[serde(default = "default_days")]
    #[validate(range(min = 1, max = 90))]
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub stored: usize,
}
