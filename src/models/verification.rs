use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

/// Status is an open string. `pending` is the only state that may move;
/// every other value is terminal.
pub fn can_transition(from: &str, to: &str) -> bool {
    from == STATUS_PENDING && to != STATUS_PENDING && is_valid_status(to)
}

pub fn is_valid_status(s: &str) -> bool {
    let len = s.len();
    (1..=32).contains(&len)
        && s.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Verification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Plaintext PII as supplied by and returned to the caller. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFields {
    pub full_name: String,
    pub dob: String,
    pub id_number: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// The at-rest form of `PiiFields`: every column is ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SubjectPii {
    pub verification_id: Uuid,
    pub full_name: Vec<u8>,
    pub dob: Vec<u8>,
    pub id_number: Vec<u8>,
    pub address: Option<Vec<u8>>,
    pub phone: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVerificationRequest {
    pub subject_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PiiAttached {
    pub verification_id: Uuid,
    pub fields_stored: usize,
}
