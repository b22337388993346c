//! User accounts and the free-form health profile attached to them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_LANGUAGE: &str = "es";

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub google_access_token: Option<String>,
    pub google_refresh_token: Option<String>,
    pub full_name: String,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub sex: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub health_goals: Option<Vec<String>>,
    pub language: String,
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user. Google-only accounts have no password hash.
    pub fn new(email: String, full_name: String, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            google_id: None,
            google_access_token: None,
            google_refresh_token: None,
            full_name,
            date_of_birth: None,
            sex: None,
            weight_kg: None,
            height_cm: None,
            health_goals: None,
            language: DEFAULT_LANGUAGE.to_string(),
            onboarding_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whole years between the date of birth and `today`.
    pub fn age_on(&self, today: chrono::NaiveDate) -> Option<i64> {
        self.date_of_birth
            .map(|dob| (today - dob.date_naive()).num_days() / 365)
    }

    pub fn has_google_tokens(&self) -> bool {
        self.google_access_token.is_some() || self.google_refresh_token.is_some()
    }
}

/// User response for the API (no credentials).
#[derive(Debug, Clone, Serialize)]
pub struct UserRead {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub sex: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub health_goals: Option<Vec<String>>,
    pub language: String,
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserRead {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            full_name: u.full_name,
            date_of_birth: u.date_of_birth,
            sex: u.sex,
            weight_kg: u.weight_kg,
            height_cm: u.height_cm,
            health_goals: u.health_goals,
            language: u.language,
            onboarding_completed: u.onboarding_completed,
            created_at: u.created_at,
        }
    }
}

/// Health profile row, keyed by user.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserHealthProfile {
    pub user_id: Uuid,
    pub medical_conditions: Option<serde_json::Value>,
    pub lifestyle_notes: Option<serde_json::Value>,
    pub ai_summary: Option<String>,
    pub updated_at: DateTime<Utc>,
}
