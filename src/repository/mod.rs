//! Persistence seam for every tenant-scoped aggregate.
//!
//! Each trait has a Postgres implementation (`crate::db::postgres`) and an
//! in-memory one (`memory`). Every method touching tenant-scoped rows takes a
//! `TenantContext` and must filter reads and stamp writes with its tenant id.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    audit::{AuditEntry, AuditEvent},
    evidence::{EvidenceObject, NewEvidence},
    payment::{NewPayment, Payment},
    tenant::{Tenant, TenantContext, TenantStatus},
    user::{NewUser, ProfileUpdate, User, UserRole, UserStatus},
    verification::{SubjectPii, Verification},
};

pub type RepoResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Fails with `Conflict` when the name is taken.
    async fn insert(&self, name: &str) -> RepoResult<Tenant>;

    /// Atomic insert; `None` when a tenant with that name already exists.
    async fn insert_if_absent(&self, name: &str) -> RepoResult<Option<Tenant>>;

    async fn get(&self, id: Uuid) -> RepoResult<Tenant>;

    async fn find_by_name(&self, name: &str) -> RepoResult<Tenant>;

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> RepoResult<Tenant>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is already registered in the tenant.
    async fn insert(&self, ctx: &TenantContext, user: NewUser) -> RepoResult<User>;

    /// Lookup used before a session exists. `tenant_id = None` searches every tenant.
    async fn find_by_email(&self, tenant_id: Option<Uuid>, email: &str) -> RepoResult<Vec<User>>;

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<User>;

    async fn list(&self, ctx: &TenantContext) -> RepoResult<Vec<User>>;

    async fn update_profile(&self, ctx: &TenantContext, id: Uuid, update: &ProfileUpdate) -> RepoResult<User>;

    async fn set_password_hash(&self, ctx: &TenantContext, id: Uuid, password_hash: &str) -> RepoResult<()>;

    async fn set_role(&self, ctx: &TenantContext, id: Uuid, role: UserRole) -> RepoResult<User>;

    async fn set_status(&self, ctx: &TenantContext, id: Uuid, status: UserStatus) -> RepoResult<User>;
}

#[async_trait]
pub trait VerificationRepository: Send + Sync {
    async fn create(&self, ctx: &TenantContext, subject_id: &str) -> RepoResult<Verification>;

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<Verification>;

    async fn list(&self, ctx: &TenantContext) -> RepoResult<Vec<Verification>>;

    /// Compare-and-set on status: `Conflict` when the current status is not `from`.
    async fn transition_status(&self, ctx: &TenantContext, id: Uuid, from: &str, to: &str) -> RepoResult<Verification>;

    /// Deletes the verification together with its PII and evidence pointers.
    /// Returns the object keys of the evidence rows that were removed.
    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<Vec<String>>;

    /// Insert or replace the encrypted PII row of a verification in the tenant.
    async fn upsert_pii(&self, ctx: &TenantContext, pii: &SubjectPii) -> RepoResult<()>;

    async fn get_pii(&self, ctx: &TenantContext, verification_id: Uuid) -> RepoResult<SubjectPii>;
}

#[async_trait]
pub trait EvidenceRepository: Send + Sync {
    /// `NotFound` when the verification is not visible in the tenant.
    async fn insert(&self, ctx: &TenantContext, evidence: NewEvidence) -> RepoResult<EvidenceObject>;

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<EvidenceObject>;

    async fn find_by_key(&self, ctx: &TenantContext, object_key: &str) -> RepoResult<EvidenceObject>;

    async fn list_for_verification(&self, ctx: &TenantContext, verification_id: Uuid) -> RepoResult<Vec<EvidenceObject>>;

    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<EvidenceObject>;
}

/// Append-only. No update or delete is offered to any caller.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> RepoResult<i64>;

    /// Newest first, with the total count for pagination.
    async fn list(
        &self,
        ctx: &TenantContext,
        action_prefix: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> RepoResult<(Vec<AuditEvent>, i64)>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, ctx: &TenantContext, payment: NewPayment) -> RepoResult<Payment>;

    async fn list_for_user(&self, ctx: &TenantContext, user_id: Uuid) -> RepoResult<Vec<Payment>>;
}

/// Handles to every repository, cheap to clone into handler state.
#[derive(Clone)]
pub struct Repositories {
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub verifications: Arc<dyn VerificationRepository>,
    pub evidence: Arc<dyn EvidenceRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Repositories {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(crate::db::postgres::PgStore::new(pool));
        Self {
            tenants: store.clone(),
            users: store.clone(),
            verifications: store.clone(),
            evidence: store.clone(),
            audit: store.clone(),
            payments: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(memory::MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            tenants: store.clone(),
            users: store.clone(),
            verifications: store.clone(),
            evidence: store.clone(),
            audit: store.clone(),
            payments: store,
        }
    }
}
