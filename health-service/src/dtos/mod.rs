pub mod auth;
pub mod coach;
pub mod garmin;
pub mod labs;
pub mod portal;
pub mod users;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}
