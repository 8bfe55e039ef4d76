use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub method: String,
    pub amount: f64,
    pub status: String,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub method: String,
    pub amount: f64,
    pub status: String,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub method: String,
    pub amount: f64,
}
