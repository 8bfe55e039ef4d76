use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::ClientInfo,
        tenant::TenantContext,
        verification::{self, PiiAttached, PiiFields, Verification},
    },
    repository::Repositories,
    services::{
        audit::{self, actions, AuditLog},
        encryption::PiiCipher,
        storage::{self, BlobStore},
    },
};

fn check_required(name: &str, value: &str, max: usize) -> AppResult<()> {
    if value.trim().is_empty() || value.len() > max {
        return Err(AppError::Validation(format!("{name} must be 1 to {max} characters")));
    }
    Ok(())
}

fn validate_pii(fields: &PiiFields) -> AppResult<()> {
    check_required("full_name", &fields.full_name, 200)?;
    check_required("id_number", &fields.id_number, 64)?;
    NaiveDate::parse_from_str(&fields.dob, "%Y-%m-%d")
        .map_err(|_| AppError::Validation("dob must be a YYYY-MM-DD date".into()))?;
    if let Some(address) = &fields.address {
        check_required("address", address, 500)?;
    }
    if let Some(phone) = &fields.phone {
        check_required("phone", phone, 32)?;
    }
    Ok(())
}

pub struct VerificationService;

impl VerificationService {
    pub async fn create(
        repos: &Repositories,
        ctx: &TenantContext,
        subject_id: &str,
        client: &ClientInfo,
    ) -> AppResult<Verification> {
        check_required("subject_id", subject_id, 128)?;
        let v = repos.verifications.create(ctx, subject_id.trim()).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::VERIFICATION_CREATE, "verification", v.id, client),
        )
        .await;
        Ok(v)
    }

    pub async fn get(repos: &Repositories, ctx: &TenantContext, id: Uuid) -> AppResult<Verification> {
        Ok(repos.verifications.get(ctx, id).await?)
    }

    /// Newest first.
    pub async fn list(repos: &Repositories, ctx: &TenantContext) -> AppResult<Vec<Verification>> {
        Ok(repos.verifications.list(ctx).await?)
    }

    /// Move a `pending` verification to another status. Terminal states are
    /// final; a transition out of one is a `Conflict`.
    pub async fn update_status(
        repos: &Repositories,
        ctx: &TenantContext,
        id: Uuid,
        to: &str,
        client: &ClientInfo,
    ) -> AppResult<Verification> {
        let to = to.trim().to_lowercase();
        if !verification::is_valid_status(&to) {
            return Err(AppError::Validation(format!("invalid status: {to}")));
        }
        let current = repos.verifications.get(ctx, id).await?;
        if !verification::can_transition(&current.status, &to) {
            return Err(AppError::Conflict(format!(
                "cannot move verification from {} to {to}",
                current.status
            )));
        }
        let v = repos
            .verifications
            .transition_status(ctx, id, &current.status, &to)
            .await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::VERIFICATION_STATUS, "verification", v.id, client),
        )
        .await;
        Ok(v)
    }

    /// Delete a verification with its PII and evidence rows, then remove the
    /// evidence blobs. Blob removal is best effort; leftovers are orphans for
    /// a cleanup sweep, never dangling rows.
    pub async fn delete(
        repos: &Repositories,
        blobs: &dyn BlobStore,
        storage_timeout: Duration,
        ctx: &TenantContext,
        id: Uuid,
        client: &ClientInfo,
    ) -> AppResult<()> {
        let keys = repos.verifications.delete(ctx, id).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::VERIFICATION_DELETE, "verification", id, client),
        )
        .await;

        for key in keys {
            if let Err(e) = storage::with_timeout(storage_timeout, blobs.delete(&key)).await {
                tracing::warn!(key = %key, "evidence blob cleanup failed: {e}");
            }
        }
        Ok(())
    }

    /// Encrypt and store the subject's PII, replacing any earlier record.
    pub async fn attach_pii(
        repos: &Repositories,
        cipher: &PiiCipher,
        ctx: &TenantContext,
        verification_id: Uuid,
        fields: &PiiFields,
        client: &ClientInfo,
    ) -> AppResult<PiiAttached> {
        validate_pii(fields)?;
        let row = cipher.encrypt_fields(verification_id, fields)?;
        repos.verifications.upsert_pii(ctx, &row).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::PII_WRITE, "verification", verification_id, client),
        )
        .await;

        let fields_stored = 3 + usize::from(row.address.is_some()) + usize::from(row.phone.is_some());
        Ok(PiiAttached { verification_id, fields_stored })
    }

    /// Decrypt the subject's PII. Every call leaves exactly one audit event:
    /// `pii.read` before disclosure, or `pii.read_denied` when nothing is
    /// visible. Disclosure does not happen if the event cannot be stored.
    pub async fn read_pii(
        repos: &Repositories,
        cipher: &PiiCipher,
        ctx: &TenantContext,
        verification_id: Uuid,
        client: &ClientInfo,
    ) -> AppResult<PiiFields> {
        let row = match repos.verifications.get_pii(ctx, verification_id).await {
            Ok(row) => row,
            Err(e) => {
                AuditLog::record(
                    repos.audit.as_ref(),
                    audit::entry(ctx, actions::PII_READ_DENIED, "verification", verification_id, client),
                )
                .await;
                return Err(e.into());
            }
        };

        AuditLog::record_strict(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::PII_READ, "verification", verification_id, client),
        )
        .await?;

        cipher.decrypt_fields(&row)
    }
}
