use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::tenant::{Tenant, TenantStatus},
    repository::Repositories,
    services::audit::{actions, system_entry, AuditLog},
};

const MAX_TENANT_NAME: usize = 100;

fn normalize_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_TENANT_NAME {
        return Err(AppError::Validation(format!(
            "tenant name must be 1 to {MAX_TENANT_NAME} characters"
        )));
    }
    Ok(name.to_string())
}

pub struct TenantRegistry;

impl TenantRegistry {
    /// Create a tenant. A taken name is a `Conflict`, never the existing row.
    pub async fn create(repos: &Repositories, name: &str) -> AppResult<Tenant> {
        let name = normalize_name(name)?;
        let tenant = repos.tenants.insert(&name).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            system_entry(tenant.id, actions::TENANT_CREATE, "tenant", tenant.id),
        )
        .await;
        tracing::info!(tenant_id = %tenant.id, name = %tenant.name, "tenant created");

        Ok(tenant)
    }

    /// Operator bootstrap: return the named tenant, creating it if needed.
    ///
    /// The insert is atomic (`ON CONFLICT DO NOTHING`), so two processes racing
    /// on startup both end up with the same row. Only the winner audits.
    pub async fn resolve_or_create_default(repos: &Repositories, name: &str) -> AppResult<Tenant> {
        let name = normalize_name(name)?;
        match repos.tenants.insert_if_absent(&name).await? {
            Some(tenant) => {
                AuditLog::record(
                    repos.audit.as_ref(),
                    system_entry(tenant.id, actions::TENANT_CREATE, "tenant", tenant.id),
                )
                .await;
                tracing::info!(tenant_id = %tenant.id, name = %tenant.name, "default tenant created");
                Ok(tenant)
            }
            None => Ok(repos.tenants.find_by_name(&name).await?),
        }
    }

    pub async fn get(repos: &Repositories, tenant_id: Uuid) -> AppResult<Tenant> {
        Ok(repos.tenants.get(tenant_id).await?)
    }

    /// The tenant behind a validated token. Unknown and suspended tenants are
    /// both `Forbidden`: the credential is valid but no usable tenant backs it.
    pub async fn require_active(repos: &Repositories, tenant_id: Uuid) -> AppResult<Tenant> {
        let tenant = repos.tenants.get(tenant_id).await.map_err(|e| match e {
            crate::repository::RepositoryError::NotFound(_) => AppError::Forbidden("unknown tenant"),
            other => other.into(),
        })?;
        if !tenant.is_active() {
            return Err(AppError::Forbidden("tenant suspended"));
        }
        Ok(tenant)
    }

    /// Tenants are never deleted; suspension is the terminal lever.
    pub async fn set_status(repos: &Repositories, tenant_id: Uuid, status: TenantStatus) -> AppResult<Tenant> {
        let tenant = repos.tenants.set_status(tenant_id, status).await?;
        AuditLog::record(
            repos.audit.as_ref(),
            system_entry(tenant.id, actions::TENANT_STATUS_CHANGE, "tenant", tenant.id),
        )
        .await;
        Ok(tenant)
    }
}
