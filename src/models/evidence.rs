use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Relational pointer to an evidence blob; the bytes live in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EvidenceObject {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub verification_id: Uuid,
    pub object_key: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub original_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub verification_id: Uuid,
    pub object_key: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub original_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PresignedUrl {
    pub evidence_id: Uuid,
    pub url: String,
    pub expires_in: u64,
    pub media_type: String,
}

/// Query string of a signed evidence file URL.
#[derive(Debug, Deserialize)]
pub struct SignedFileQuery {
    pub expires: i64,
    pub signature: String,
}
