use super::{db_error, Database};
use crate::models::{GarminConnection, GarminDataPoint};
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use uuid::Uuid;

const CONNECTION_COLUMNS: &str = "user_id, garmin_user_id, access_token, refresh_token, \
    token_expires_at, last_sync_at, created_at";

impl Database {
    pub async fn find_garmin_connection(
        &self,
        user_id: Uuid,
    ) -> Result<Option<GarminConnection>, AppError> {
        sqlx::query_as::<_, GarminConnection>(&format!(
            "SELECT {} FROM garmin_connections WHERE user_id = $1",
            CONNECTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load Garmin connection"))
    }

    pub async fn find_garmin_connection_by_garmin_id(
        &self,
        garmin_user_id: &str,
    ) -> Result<Option<GarminConnection>, AppError> {
        sqlx::query_as::<_, GarminConnection>(&format!(
            "SELECT {} FROM garmin_connections WHERE garmin_user_id = $1",
            CONNECTION_COLUMNS
        ))
        .bind(garmin_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load Garmin connection"))
    }

    pub async fn upsert_garmin_connection(
        &self,
        user_id: Uuid,
        garmin_user_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<GarminConnection, AppError> {
        sqlx::query_as::<_, GarminConnection>(&format!(
            r#"
            INSERT INTO garmin_connections (user_id, garmin_user_id, access_token, refresh_token, token_expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET garmin_user_id = EXCLUDED.garmin_user_id,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_expires_at = EXCLUDED.token_expires_at
            RETURNING {}
            "#,
            CONNECTION_COLUMNS
        ))
        .bind(user_id)
        .bind(garmin_user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to save Garmin connection"))
    }

    pub async fn update_garmin_tokens(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE garmin_connections SET access_token = $2, refresh_token = $3, \
             token_expires_at = $4 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to refresh Garmin tokens"))?;
        Ok(())
    }

    /// Returns false when there was nothing to delete.
    pub async fn delete_garmin_connection(&self, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM garmin_connections WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete Garmin connection"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_garmin_synced(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE garmin_connections SET last_sync_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to update Garmin sync time"))?;
        Ok(())
    }

    /// One point per (user, data_type, date); a newer summary replaces the old one.
    pub async fn upsert_data_point(
        &self,
        user_id: Uuid,
        data_type: &str,
        date: NaiveDate,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO garmin_data_points (id, user_id, data_type, date, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, data_type, date) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(data_type)
        .bind(date)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to store Garmin data point"))?;
        Ok(())
    }

    pub async fn list_data_points(
        &self,
        user_id: Uuid,
        data_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<GarminDataPoint>, AppError> {
        sqlx::query_as::<_, GarminDataPoint>(
            "SELECT id, user_id, data_type, date, data FROM garmin_data_points \
             WHERE user_id = $1 AND data_type = $2 AND date >= $3 AND date <= $4 \
             ORDER BY date DESC",
        )
        .bind(user_id)
        .bind(data_type)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list Garmin data"))
    }
}
