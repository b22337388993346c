//! Lab panels, partners, orders, results and extracted biomarker values.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an uploaded lab PDF through the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Extracted,
    ReviewNeeded,
    Verified,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Extracted => "extracted",
            ProcessingStatus::ReviewNeeded => "review_needed",
            ProcessingStatus::Verified => "verified",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// States a reviewer may promote to `verified`.
    pub fn awaits_review(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::ReviewNeeded | ProcessingStatus::Extracted
        )
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "extracted" => Ok(ProcessingStatus::Extracted),
            "review_needed" => Ok(ProcessingStatus::ReviewNeeded),
            "verified" => Ok(ProcessingStatus::Verified),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    SentToLab,
    SampleCollected,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::SentToLab => "sent_to_lab",
            OrderStatus::SampleCollected => "sample_collected",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiomarkerStatus {
    Normal,
    Borderline,
    Flagged,
}

impl BiomarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiomarkerStatus::Normal => "normal",
            BiomarkerStatus::Borderline => "borderline",
            BiomarkerStatus::Flagged => "flagged",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LabPanel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub biomarkers: serde_json::Value,
    pub price_cents: i32,
    pub tier_included: Option<String>,
    #[serde(skip_serializing)]
    pub active: bool,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LabPartner {
    pub id: Uuid,
    pub name: String,
    pub code_prefix: String,
    pub email_address: Option<String>,
    pub password_hash: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LabOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub panel_id: Uuid,
    pub order_code: String,
    pub status: String,
    pub lab_partner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabOrder {
    pub fn new(
        user_id: Uuid,
        panel_id: Uuid,
        order_code: String,
        lab_partner_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            panel_id,
            order_code,
            status: OrderStatus::Pending.as_str().to_string(),
            lab_partner_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRead {
    pub id: Uuid,
    pub panel_id: Uuid,
    pub order_code: String,
    pub status: String,
    pub lab_partner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<LabOrder> for OrderRead {
    fn from(o: LabOrder) -> Self {
        Self {
            id: o.id,
            panel_id: o.panel_id,
            order_code: o.order_code,
            status: o.status,
            lab_partner_id: o.lab_partner_id,
            created_at: o.created_at,
        }
    }
}

/// Partner-facing order listing, joined with panel and patient names.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PortalOrderRead {
    pub id: Uuid,
    pub order_code: String,
    pub status: String,
    pub panel_name: String,
    pub user_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LabResult {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub pdf_storage_key: Option<String>,
    pub processing_status: String,
    pub ai_summary: Option<String>,
    pub confidence_score: Option<f64>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabResult {
    /// A freshly uploaded PDF waiting for extraction.
    pub fn pending(user_id: Uuid, order_id: Option<Uuid>, pdf_storage_key: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id,
            pdf_storage_key: Some(pdf_storage_key),
            processing_status: ProcessingStatus::Pending.as_str().to_string(),
            ai_summary: None,
            confidence_score: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> Option<ProcessingStatus> {
        self.processing_status.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSummaryRead {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub processing_status: String,
    pub ai_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LabResult> for ResultSummaryRead {
    fn from(r: LabResult) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            processing_status: r.processing_status,
            ai_summary: r.ai_summary,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultRead {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub processing_status: String,
    pub ai_summary: Option<String>,
    pub confidence_score: Option<f64>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub biomarker_values: Vec<LabBiomarkerValue>,
}

impl ResultRead {
    pub fn new(result: LabResult, biomarker_values: Vec<LabBiomarkerValue>) -> Self {
        Self {
            id: result.id,
            order_id: result.order_id,
            processing_status: result.processing_status,
            ai_summary: result.ai_summary,
            confidence_score: result.confidence_score,
            reviewed_by: result.reviewed_by,
            reviewed_at: result.reviewed_at,
            created_at: result.created_at,
            biomarker_values,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LabBiomarkerValue {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub result_id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub biomarker_code: String,
    pub biomarker_name: String,
    pub value: f64,
    pub unit: String,
    pub reference_range_low: Option<f64>,
    pub reference_range_high: Option<f64>,
    pub status: String,
    pub confidence: Option<f64>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiomarkerHistoryPoint {
    pub value: f64,
    pub unit: String,
    pub status: String,
    pub date: NaiveDate,
    pub reference_range_low: Option<f64>,
    pub reference_range_high: Option<f64>,
}

impl From<LabBiomarkerValue> for BiomarkerHistoryPoint {
    fn from(v: LabBiomarkerValue) -> Self {
        Self {
            value: v.value,
            unit: v.unit,
            status: v.status,
            date: v.date,
            reference_range_low: v.reference_range_low,
            reference_range_high: v.reference_range_high,
        }
    }
}
