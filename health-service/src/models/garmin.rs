use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// OAuth connection between a user and their Garmin account.
#[derive(Debug, Clone, FromRow)]
pub struct GarminConnection {
    pub user_id: Uuid,
    pub garmin_user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl GarminConnection {
    /// True when the access token is still good for at least `margin`.
    pub fn token_valid_for(&self, margin: chrono::Duration) -> bool {
        self.token_expires_at > Utc::now() + margin
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRead {
    pub garmin_user_id: String,
    pub connected: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<GarminConnection> for ConnectionRead {
    fn from(c: GarminConnection) -> Self {
        Self {
            garmin_user_id: c.garmin_user_id,
            connected: true,
            last_sync_at: c.last_sync_at,
            created_at: c.created_at,
        }
    }
}

/// One day of one wearable metric, stored as the raw Garmin summary.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GarminDataPoint {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub data_type: String,
    pub date: NaiveDate,
    pub data: serde_json::Value,
}
