use crate::services::database::UserUpdate;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UserUpdateRequest {
    #[validate(length(min = 1, max = 256))]
    pub full_name: Option<String>,
    pub date_of_birth: Option<DateTime<Utc>>,
    #[validate(length(max = 32))]
    pub sex: Option<String>,
    #[validate(range(min = 0.0, max = 700.0))]
    pub weight_kg: Option<f64>,
    #[validate(range(min = 0.0, max = 300.0))]
    pub height_cm: Option<f64>,
    pub health_goals: Option<Vec<String>>,
    #[validate(length(min = 2, max = 8))]
    pub language: Option<String>,
    pub onboarding_completed: Option<bool>,
}

impl From<UserUpdateRequest> for UserUpdate {
    fn from(req: UserUpdateRequest) -> Self {
        Self {
            full_name: req.full_name.map(|n| crate::utils::clean_name(&n)),
            date_of_birth: req.date_of_birth,
            sex: req.sex,
            weight_kg: req.weight_kg,
            height_cm: req.height_cm,
            health_goals: req.health_goals,
            language: req.language,
            onboarding_completed: req.onboarding_completed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthProfileUpdate {
    pub medical_conditions: Option<serde_json::Value>,
    pub lifestyle_notes: Option<serde_json::Value>,
}
