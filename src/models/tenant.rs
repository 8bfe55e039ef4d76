use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self { TenantStatus::Active => "active", TenantStatus::Suspended => "suspended" })
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            _ => Err(anyhow::anyhow!("Unknown tenant status: {s}")),
        }
    }
}

/// DB row struct; status is stored as TEXT.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active.to_string()
    }
}

/// Creates a tenant together with its first admin principal.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub tenant_name: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeTenantStatusRequest {
    pub status: TenantStatus,
}

/// Tenant binding for one unit of work, derived from validated claims.
///
/// Repositories take this instead of a bare tenant id: reads filter on
/// `tenant_id`, writes stamp it, and the Postgres layer also sets it as the
/// row-level-security session variable. It is never cached across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Uuid,
    actor_id: Option<Uuid>,
}

impl TenantContext {
    pub fn for_principal(tenant_id: Uuid, actor_id: Uuid) -> Self {
        Self { tenant_id, actor_id: Some(actor_id) }
    }

    /// Context for actions taken by the system or an operator, with no actor.
    pub fn system(tenant_id: Uuid) -> Self {
        Self { tenant_id, actor_id: None }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        self.actor_id
    }
}
