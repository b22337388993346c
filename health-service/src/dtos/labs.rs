use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OrderCreate {
    pub panel_id: Uuid,
    pub lab_partner_id: Option<Uuid>,
}
