use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        audit::{AuditEntry, AuditEvent, AuditQuery},
        auth::ClientInfo,
        tenant::TenantContext,
    },
    repository::AuditRepository,
};

/// Action names recorded in the audit log.
pub mod actions {
    pub const TENANT_CREATE: &str = "tenant.create";
    pub const TENANT_STATUS_CHANGE: &str = "tenant.status_change";
    pub const USER_REGISTER: &str = "user.register";
    pub const USER_PROFILE_UPDATE: &str = "user.profile_update";
    pub const USER_PASSWORD_CHANGE: &str = "user.password_change";
    pub const USER_ROLE_CHANGE: &str = "user.role_change";
    pub const USER_STATUS_CHANGE: &str = "user.status_change";
    pub const LOGIN: &str = "auth.login";
    pub const LOGIN_FAILED: &str = "auth.login_failed";
    pub const VERIFICATION_CREATE: &str = "verification.create";
    pub const VERIFICATION_STATUS: &str = "verification.status_change";
    pub const VERIFICATION_DELETE: &str = "verification.delete";
    pub const PII_WRITE: &str = "pii.write";
    pub const PII_READ: &str = "pii.read";
    pub const PII_READ_DENIED: &str = "pii.read_denied";
    pub const EVIDENCE_UPLOAD: &str = "evidence.upload";
    pub const EVIDENCE_DOWNLOAD: &str = "evidence.download";
    pub const EVIDENCE_PRESIGN: &str = "evidence.presign";
    pub const EVIDENCE_DELETE: &str = "evidence.delete";
    pub const PAYMENT_CREATE: &str = "payment.create";
}

/// Build an entry attributed to the context's actor.
pub fn entry(
    ctx: &TenantContext,
    action: &str,
    target_type: &str,
    target_id: impl ToString,
    client: &ClientInfo,
) -> AuditEntry {
    AuditEntry {
        tenant_id: Some(ctx.tenant_id()),
        actor_id: ctx.actor_id(),
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id: target_id.to_string(),
        client_ip: client.ip.clone(),
        user_agent: client.user_agent.clone(),
    }
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEvent>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

pub struct AuditLog;

impl AuditLog {
    /// Append an event. Failures are logged, never propagated: the action it
    /// describes has already happened.
    pub async fn record(repo: &dyn AuditRepository, entry: AuditEntry) {
        let (tenant, action) = (entry.tenant_id, entry.action.clone());
        if let Err(e) = repo.append(entry).await {
            tracing::warn!(?tenant, %action, "audit log insert failed: {e}");
        }
    }

    /// Append an event and fail the caller if it cannot be stored.
    /// Used in front of PII disclosure, which must never go unrecorded.
    pub async fn record_strict(repo: &dyn AuditRepository, entry: AuditEntry) -> AppResult<i64> {
        Ok(repo.append(entry).await?)
    }

    pub async fn list(
        repo: &dyn AuditRepository,
        ctx: &TenantContext,
        query: &AuditQuery,
    ) -> AppResult<AuditPage> {
        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        let page = query.page.unwrap_or(1).max(1);
        let offset = (page - 1) * limit;

        let (entries, total) = repo
            .list(ctx, query.action.as_deref().filter(|a| !a.is_empty()), limit, offset)
            .await?;

        Ok(AuditPage { entries, total, page, limit })
    }
}

/// Attribute a system action (no actor) to a tenant.
pub fn system_entry(tenant_id: Uuid, action: &str, target_type: &str, target_id: impl ToString) -> AuditEntry {
    AuditEntry {
        tenant_id: Some(tenant_id),
        actor_id: None,
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id: target_id.to_string(),
        client_ip: None,
        user_agent: None,
    }
}

/// A failed login whose email and tenant hint match no tenant.
pub fn unattributed_login_failure(email: &str, client: &ClientInfo) -> AuditEntry {
    AuditEntry {
        tenant_id: None,
        actor_id: None,
        action: actions::LOGIN_FAILED.to_string(),
        target_type: "user".to_string(),
        target_id: email.to_string(),
        client_ip: client.ip.clone(),
        user_agent: client.user_agent.clone(),
    }
}
