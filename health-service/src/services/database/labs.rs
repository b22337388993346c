use super::{db_error, Database};
use crate::models::{
    LabBiomarkerValue, LabOrder, LabPanel, LabPartner, LabResult, OrderStatus, PortalOrderRead,
    ProcessingStatus,
};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

const PANEL_COLUMNS: &str =
    "id, name, description, biomarkers, price_cents, tier_included, active, created_at";
const PARTNER_COLUMNS: &str =
    "id, name, code_prefix, email_address, password_hash, active, created_at";
const ORDER_COLUMNS: &str =
    "id, user_id, panel_id, order_code, status, lab_partner_id, created_at, updated_at";
const RESULT_COLUMNS: &str = "id, user_id, order_id, pdf_storage_key, processing_status, \
    ai_summary, confidence_score, reviewed_by, reviewed_at, created_at, updated_at";
const BIOMARKER_COLUMNS: &str = "id, result_id, user_id, biomarker_code, biomarker_name, value, \
    unit, reference_range_low, reference_range_high, status, confidence, date";

impl Database {
    // Panels and partners

    pub async fn list_active_panels(&self) -> Result<Vec<LabPanel>, AppError> {
        sqlx::query_as::<_, LabPanel>(&format!(
            "SELECT {} FROM lab_panels WHERE active ORDER BY price_cents ASC, name ASC",
            PANEL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list panels"))
    }

    pub async fn find_panel(&self, panel_id: Uuid) -> Result<Option<LabPanel>, AppError> {
        sqlx::query_as::<_, LabPanel>(&format!(
            "SELECT {} FROM lab_panels WHERE id = $1",
            PANEL_COLUMNS
        ))
        .bind(panel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load panel"))
    }

    pub async fn find_partner(&self, partner_id: Uuid) -> Result<Option<LabPartner>, AppError> {
        sqlx::query_as::<_, LabPartner>(&format!(
            "SELECT {} FROM lab_partners WHERE id = $1",
            PARTNER_COLUMNS
        ))
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load partner"))
    }

    pub async fn find_partner_by_prefix(
        &self,
        code_prefix: &str,
    ) -> Result<Option<LabPartner>, AppError> {
        sqlx::query_as::<_, LabPartner>(&format!(
            "SELECT {} FROM lab_partners WHERE code_prefix = $1",
            PARTNER_COLUMNS
        ))
        .bind(code_prefix)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load partner"))
    }

    // Orders

    pub async fn create_order(&self, order: &LabOrder) -> Result<LabOrder, AppError> {
        sqlx::query_as::<_, LabOrder>(&format!(
            r#"
            INSERT INTO lab_orders (id, user_id, panel_id, order_code, status, lab_partner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.panel_id)
        .bind(&order.order_code)
        .bind(&order.status)
        .bind(order.lab_partner_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false)
            {
                AppError::Conflict(anyhow::anyhow!("Order code collision"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create order: {}", e))
            }
        })
    }

    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<LabOrder>, AppError> {
        sqlx::query_as::<_, LabOrder>(&format!(
            "SELECT {} FROM lab_orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list orders"))
    }

    /// Orders routed to a partner, optionally narrowed to one exact order code.
    pub async fn list_partner_orders(
        &self,
        partner_id: Uuid,
        order_code: Option<&str>,
    ) -> Result<Vec<PortalOrderRead>, AppError> {
        sqlx::query_as::<_, PortalOrderRead>(
            r#"
            SELECT o.id, o.order_code, o.status,
                   COALESCE(p.name, 'Unknown') AS panel_name,
                   COALESCE(u.full_name, 'Unknown') AS user_name,
                   o.created_at
            FROM lab_orders o
            LEFT JOIN lab_panels p ON p.id = o.panel_id
            LEFT JOIN users u ON u.id = o.user_id
            WHERE o.lab_partner_id = $1 AND ($2::TEXT IS NULL OR o.order_code = $2)
            ORDER BY o.created_at DESC
            "#,
        )
        .bind(partner_id)
        .bind(order_code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list partner orders"))
    }

    pub async fn find_partner_order(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
    ) -> Result<Option<LabOrder>, AppError> {
        sqlx::query_as::<_, LabOrder>(&format!(
            "SELECT {} FROM lab_orders WHERE id = $1 AND lab_partner_id = $2",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load order"))
    }

    // Results

    pub async fn create_result(&self, result: &LabResult) -> Result<LabResult, AppError> {
        insert_result(&self.pool, result).await
    }

    /// Pending result for a partner upload; the order is closed in the same transaction.
    #[instrument(skip(self, result), fields(result_id = %result.id, order_id = %order_id))]
    pub async fn create_result_for_order(
        &self,
        order_id: Uuid,
        result: &LabResult,
    ) -> Result<LabResult, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let created = insert_result(&mut *tx, result).await?;

        sqlx::query("UPDATE lab_orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(OrderStatus::Completed.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to update order status"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit result upload"))?;

        Ok(created)
    }

    pub async fn list_results(&self, user_id: Uuid) -> Result<Vec<LabResult>, AppError> {
        sqlx::query_as::<_, LabResult>(&format!(
            "SELECT {} FROM lab_results WHERE user_id = $1 ORDER BY created_at DESC",
            RESULT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list results"))
    }

    pub async fn find_user_result(
        &self,
        result_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<LabResult>, AppError> {
        sqlx::query_as::<_, LabResult>(&format!(
            "SELECT {} FROM lab_results WHERE id = $1 AND user_id = $2",
            RESULT_COLUMNS
        ))
        .bind(result_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load result"))
    }

    pub async fn find_result(&self, result_id: Uuid) -> Result<Option<LabResult>, AppError> {
        sqlx::query_as::<_, LabResult>(&format!(
            "SELECT {} FROM lab_results WHERE id = $1",
            RESULT_COLUMNS
        ))
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load result"))
    }

    /// Result attached to an order the partner fulfils.
    pub async fn find_partner_result(
        &self,
        result_id: Uuid,
        partner_id: Uuid,
    ) -> Result<Option<LabResult>, AppError> {
        sqlx::query_as::<_, LabResult>(&format!(
            "SELECT {} FROM lab_results r WHERE r.id = $1 AND EXISTS (\
                SELECT 1 FROM lab_orders o WHERE o.id = r.order_id AND o.lab_partner_id = $2)",
            RESULT_COLUMNS
                .split(", ")
                .map(|c| format!("r.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(result_id)
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load result"))
    }

    pub async fn list_results_with_status(
        &self,
        statuses: &[ProcessingStatus],
    ) -> Result<Vec<LabResult>, AppError> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        sqlx::query_as::<_, LabResult>(&format!(
            "SELECT {} FROM lab_results WHERE processing_status = ANY($1) ORDER BY created_at ASC",
            RESULT_COLUMNS
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list results by status"))
    }

    pub async fn set_result_status(
        &self,
        result_id: Uuid,
        status: ProcessingStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE lab_results SET processing_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(result_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update result status"))?;
        Ok(())
    }

    /// Store extracted biomarkers and the routing outcome atomically.
    /// Values from a previous attempt on the same result are replaced.
    #[instrument(skip(self, values), fields(result_id = %result_id, count = values.len()))]
    pub async fn complete_result(
        &self,
        result_id: Uuid,
        status: ProcessingStatus,
        confidence: f64,
        values: &[LabBiomarkerValue],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        sqlx::query("DELETE FROM lab_biomarker_values WHERE result_id = $1")
            .bind(result_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to clear biomarker values"))?;

        for value in values {
            sqlx::query(&format!(
                "INSERT INTO lab_biomarker_values ({}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                BIOMARKER_COLUMNS
            ))
            .bind(value.id)
            .bind(value.result_id)
            .bind(value.user_id)
            .bind(&value.biomarker_code)
            .bind(&value.biomarker_name)
            .bind(value.value)
            .bind(&value.unit)
            .bind(value.reference_range_low)
            .bind(value.reference_range_high)
            .bind(&value.status)
            .bind(value.confidence)
            .bind(value.date)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to store biomarker value"))?;
        }

        sqlx::query(
            "UPDATE lab_results SET processing_status = $2, confidence_score = $3, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(result_id)
        .bind(status.as_str())
        .bind(confidence)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update result"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit extraction"))?;
        Ok(())
    }

    /// Promote a result awaiting review to `verified`. Returns `None` when the
    /// result is not in a reviewable state.
    pub async fn verify_result(
        &self,
        result_id: Uuid,
        reviewer: &str,
    ) -> Result<Option<LabResult>, AppError> {
        sqlx::query_as::<_, LabResult>(&format!(
            r#"
            UPDATE lab_results
            SET processing_status = $2, reviewed_by = $3, reviewed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND processing_status IN ($4, $5)
            RETURNING {}
            "#,
            RESULT_COLUMNS
        ))
        .bind(result_id)
        .bind(ProcessingStatus::Verified.as_str())
        .bind(reviewer)
        .bind(ProcessingStatus::ReviewNeeded.as_str())
        .bind(ProcessingStatus::Extracted.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to verify result"))
    }

    /// Biomarker codes of the panel behind the result's order, if any.
    pub async fn expected_panel_biomarkers(
        &self,
        result_id: Uuid,
    ) -> Result<Option<serde_json::Value>, AppError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT p.biomarkers
            FROM lab_results r
            JOIN lab_orders o ON o.id = r.order_id
            JOIN lab_panels p ON p.id = o.panel_id
            WHERE r.id = $1
            "#,
        )
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load panel biomarkers"))
    }

    // Biomarker values

    pub async fn list_biomarker_values(
        &self,
        result_id: Uuid,
    ) -> Result<Vec<LabBiomarkerValue>, AppError> {
        sqlx::query_as::<_, LabBiomarkerValue>(&format!(
            "SELECT {} FROM lab_biomarker_values WHERE result_id = $1 ORDER BY biomarker_code ASC",
            BIOMARKER_COLUMNS
        ))
        .bind(result_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list biomarker values"))
    }

    pub async fn biomarker_history(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<Vec<LabBiomarkerValue>, AppError> {
        sqlx::query_as::<_, LabBiomarkerValue>(&format!(
            "SELECT {} FROM lab_biomarker_values WHERE user_id = $1 AND biomarker_code = $2 \
             ORDER BY date ASC",
            BIOMARKER_COLUMNS
        ))
        .bind(user_id)
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load biomarker history"))
    }
}

async fn insert_result<'e, E>(executor: E, result: &LabResult) -> Result<LabResult, AppError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, LabResult>(&format!(
        r#"
        INSERT INTO lab_results (id, user_id, order_id, pdf_storage_key, processing_status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        RESULT_COLUMNS
    ))
    .bind(result.id)
    .bind(result.user_id)
    .bind(result.order_id)
    .bind(&result.pdf_storage_key)
    .bind(&result.processing_status)
    .bind(result.created_at)
    .bind(result.updated_at)
    .fetch_one(executor)
    .await
    .map_err(db_error("Failed to create result"))
}
