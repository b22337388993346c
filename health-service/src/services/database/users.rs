use super::{db_error, Database};
use crate::models::{User, UserHealthProfile};
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, password_hash, google_id, google_access_token, \
    google_refresh_token, full_name, date_of_birth, sex, weight_kg, height_cm, health_goals, \
    language, onboarding_completed, created_at, updated_at";

/// Partial profile update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub sex: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub health_goals: Option<Vec<String>>,
    pub language: Option<String>,
    pub onboarding_completed: Option<bool>,
}

impl Database {
    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load user"))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load user by email"))
    }

    pub async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE google_id = $1",
            USER_COLUMNS
        ))
        .bind(google_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load user by Google id"))
    }

    /// Insert a new user. A duplicate email surfaces as `Conflict`.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn create_user(&self, user: &User) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, google_id, google_access_token,
                google_refresh_token, full_name, language, onboarding_completed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.google_id)
        .bind(&user.google_access_token)
        .bind(&user.google_refresh_token)
        .bind(&user.full_name)
        .bind(&user.language)
        .bind(user.onboarding_completed)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false)
            {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e))
            }
        })
    }

    /// Attach a Google identity and store its tokens. A missing refresh token
    /// keeps the previously stored one.
    pub async fn set_google_identity(
        &self,
        user_id: Uuid,
        google_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET google_id = $2,
                google_access_token = $3,
                google_refresh_token = COALESCE($4, google_refresh_token),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(google_id)
        .bind(access_token)
        .bind(refresh_token)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to store Google identity"))
    }

    pub async fn set_google_access_token(
        &self,
        user_id: Uuid,
        access_token: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET google_access_token = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(access_token)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to store Google access token"))?;
        Ok(())
    }

    #[instrument(skip(self, update))]
    pub async fn update_user(&self, user_id: Uuid, update: &UserUpdate) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                date_of_birth = COALESCE($3, date_of_birth),
                sex = COALESCE($4, sex),
                weight_kg = COALESCE($5, weight_kg),
                height_cm = COALESCE($6, height_cm),
                health_goals = COALESCE($7, health_goals),
                language = COALESCE($8, language),
                onboarding_completed = COALESCE($9, onboarding_completed),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(&update.full_name)
        .bind(update.date_of_birth)
        .bind(&update.sex)
        .bind(update.weight_kg)
        .bind(update.height_cm)
        .bind(&update.health_goals)
        .bind(&update.language)
        .bind(update.onboarding_completed)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to update user"))?
        .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub async fn get_health_profile(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserHealthProfile>, AppError> {
        sqlx::query_as::<_, UserHealthProfile>(
            "SELECT user_id, medical_conditions, lifestyle_notes, ai_summary, updated_at \
             FROM user_health_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load health profile"))
    }

    /// Create or update the profile; `None` fields keep their stored value.
    pub async fn upsert_health_profile(
        &self,
        user_id: Uuid,
        medical_conditions: Option<&serde_json::Value>,
        lifestyle_notes: Option<&serde_json::Value>,
    ) -> Result<UserHealthProfile, AppError> {
        sqlx::query_as::<_, UserHealthProfile>(
            r#"
            INSERT INTO user_health_profiles (user_id, medical_conditions, lifestyle_notes, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET medical_conditions = COALESCE(EXCLUDED.medical_conditions, user_health_profiles.medical_conditions),
                lifestyle_notes = COALESCE(EXCLUDED.lifestyle_notes, user_health_profiles.lifestyle_notes),
                updated_at = NOW()
            RETURNING user_id, medical_conditions, lifestyle_notes, ai_summary, updated_at
            "#,
        )
        .bind(user_id)
        .bind(medical_conditions)
        .bind(lifestyle_notes)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to save health profile"))
    }
}
