//! In-memory repositories (tests and local development).
//!
//! A single `MemoryStore` backs every trait so cascades and tenant filters
//! behave like the relational schema: one lock, one set of tables.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::*;

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    verifications: HashMap<Uuid, Verification>,
    pii: HashMap<Uuid, SubjectPii>,
    evidence: HashMap<Uuid, EvidenceObject>,
    audit: Vec<AuditEvent>,
    payments: HashMap<Uuid, Payment>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Raw stored user rows, bypassing tenant scoping.
    pub fn raw_users(&self) -> Vec<User> {
        self.tables.read().users.values().cloned().collect()
    }

    /// Raw stored PII rows (ciphertext), bypassing tenant scoping.
    pub fn raw_pii(&self) -> Vec<SubjectPii> {
        self.tables.read().pii.values().cloned().collect()
    }

    pub fn raw_evidence(&self) -> Vec<EvidenceObject> {
        self.tables.read().evidence.values().cloned().collect()
    }

    pub fn raw_audit(&self) -> Vec<AuditEvent> {
        self.tables.read().audit.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn new_tenant(name: &str) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: name.to_string(),
        status: TenantStatus::Active.to_string(),
        created_at: Utc::now(),
    }
}

fn visible_user<'a>(t: &'a mut Tables, ctx: &TenantContext, id: Uuid) -> RepoResult<&'a mut User> {
    t.users
        .get_mut(&id)
        .filter(|u| u.tenant_id == ctx.tenant_id())
        .ok_or(RepositoryError::NotFound("user"))
}

fn visible_verification(t: &Tables, ctx: &TenantContext, id: Uuid) -> RepoResult<Verification> {
    t.verifications
        .get(&id)
        .filter(|v| v.tenant_id == ctx.tenant_id())
        .cloned()
        .ok_or(RepositoryError::NotFound("verification"))
}

#[async_trait]
impl TenantRepository for MemoryStore {
    async fn insert(&self, name: &str) -> RepoResult<Tenant> {
        self.insert_if_absent(name)
            .await?
            .ok_or_else(|| RepositoryError::Conflict(format!("tenant name '{name}' is taken")))
    }

    async fn insert_if_absent(&self, name: &str) -> RepoResult<Option<Tenant>> {
        let mut t = self.tables.write();
        if t.tenants.values().any(|x| x.name == name) {
            return Ok(None);
        }
        let tenant = new_tenant(name);
        t.tenants.insert(tenant.id, tenant.clone());
        Ok(Some(tenant))
    }

    async fn get(&self, id: Uuid) -> RepoResult<Tenant> {
        self.tables
            .read()
            .tenants
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound("tenant"))
    }

    async fn find_by_name(&self, name: &str) -> RepoResult<Tenant> {
        self.tables
            .read()
            .tenants
            .values()
            .find(|x| x.name == name)
            .cloned()
            .ok_or(RepositoryError::NotFound("tenant"))
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> RepoResult<Tenant> {
        let mut t = self.tables.write();
        let tenant = t.tenants.get_mut(&id).ok_or(RepositoryError::NotFound("tenant"))?;
        tenant.status = status.to_string();
        Ok(tenant.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, ctx: &TenantContext, user: NewUser) -> RepoResult<User> {
        let mut t = self.tables.write();
        if !t.tenants.contains_key(&ctx.tenant_id()) {
            return Err(RepositoryError::NotFound("tenant"));
        }
        if t
            .users
            .values()
            .any(|u| u.tenant_id == ctx.tenant_id() && u.email == user.email)
        {
            return Err(RepositoryError::Conflict("email already registered".into()));
        }
        let now = Utc::now();
        let row = User {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            email: user.email,
            password_hash: user.password_hash,
            role: user.role.to_string(),
            status: UserStatus::Active.to_string(),
            full_name: user.profile.full_name,
            phone: user.profile.phone,
            notes: user.profile.notes,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_email(&self, tenant_id: Option<Uuid>, email: &str) -> RepoResult<Vec<User>> {
        let mut rows: Vec<User> = self
            .tables
            .read()
            .users
            .values()
            .filter(|u| u.email == email && tenant_id.map_or(true, |tid| u.tenant_id == tid))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<User> {
        let mut t = self.tables.write();
        visible_user(&mut t, ctx, id).map(|u| u.clone())
    }

    async fn list(&self, ctx: &TenantContext) -> RepoResult<Vec<User>> {
        let mut users: Vec<User> = self
            .tables
            .read()
            .users
            .values()
            .filter(|u| u.tenant_id == ctx.tenant_id())
            .cloned()
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn update_profile(&self, ctx: &TenantContext, id: Uuid, update: &ProfileUpdate) -> RepoResult<User> {
        let mut t = self.tables.write();
        let user = visible_user(&mut t, ctx, id)?;
        if let Some(name) = &update.full_name {
            user.full_name = name.clone();
        }
        if let Some(phone) = &update.phone {
            user.phone = Some(phone.clone());
        }
        if let Some(notes) = &update.notes {
            user.notes = Some(notes.clone());
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_password_hash(&self, ctx: &TenantContext, id: Uuid, password_hash: &str) -> RepoResult<()> {
        let mut t = self.tables.write();
        let user = visible_user(&mut t, ctx, id)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_role(&self, ctx: &TenantContext, id: Uuid, role: UserRole) -> RepoResult<User> {
        let mut t = self.tables.write();
        let user = visible_user(&mut t, ctx, id)?;
        user.role = role.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_status(&self, ctx: &TenantContext, id: Uuid, status: UserStatus) -> RepoResult<User> {
        let mut t = self.tables.write();
        let user = visible_user(&mut t, ctx, id)?;
        user.status = status.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl VerificationRepository for MemoryStore {
    async fn create(&self, ctx: &TenantContext, subject_id: &str) -> RepoResult<Verification> {
        let now = Utc::now();
        let row = Verification {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            subject_id: subject_id.to_string(),
            status: crate::models::verification::STATUS_PENDING.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().verifications.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<Verification> {
        visible_verification(&self.tables.read(), ctx, id)
    }

    async fn list(&self, ctx: &TenantContext) -> RepoResult<Vec<Verification>> {
        let mut rows: Vec<Verification> = self
            .tables
            .read()
            .verifications
            .values()
            .filter(|v| v.tenant_id == ctx.tenant_id())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn transition_status(&self, ctx: &TenantContext, id: Uuid, from: &str, to: &str) -> RepoResult<Verification> {
        let mut t = self.tables.write();
        let row = t
            .verifications
            .get_mut(&id)
            .filter(|v| v.tenant_id == ctx.tenant_id())
            .ok_or(RepositoryError::NotFound("verification"))?;
        if row.status != from {
            return Err(RepositoryError::Conflict(format!(
                "verification is '{}', expected '{from}'",
                row.status
            )));
        }
        row.status = to.to_string();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<Vec<String>> {
        let mut t = self.tables.write();
        visible_verification(&t, ctx, id)?;
        t.verifications.remove(&id);
        t.pii.remove(&id);
        let keys: Vec<String> = t
            .evidence
            .values()
            .filter(|e| e.verification_id == id)
            .map(|e| e.object_key.clone())
            .collect();
        t.evidence.retain(|_, e| e.verification_id != id);
        Ok(keys)
    }

    async fn upsert_pii(&self, ctx: &TenantContext, pii: &SubjectPii) -> RepoResult<()> {
        let mut t = self.tables.write();
        visible_verification(&t, ctx, pii.verification_id)?;
        t.pii.insert(pii.verification_id, pii.clone());
        Ok(())
    }

    async fn get_pii(&self, ctx: &TenantContext, verification_id: Uuid) -> RepoResult<SubjectPii> {
        let t = self.tables.read();
        visible_verification(&t, ctx, verification_id)?;
        t.pii
            .get(&verification_id)
            .cloned()
            .ok_or(RepositoryError::NotFound("subject pii"))
    }
}

#[async_trait]
impl EvidenceRepository for MemoryStore {
    async fn insert(&self, ctx: &TenantContext, evidence: NewEvidence) -> RepoResult<EvidenceObject> {
        let mut t = self.tables.write();
        visible_verification(&t, ctx, evidence.verification_id)?;
        if t.evidence.values().any(|e| e.object_key == evidence.object_key) {
            return Err(RepositoryError::Conflict("object key already in use".into()));
        }
        let row = EvidenceObject {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            verification_id: evidence.verification_id,
            object_key: evidence.object_key,
            media_type: evidence.media_type,
            size_bytes: evidence.size_bytes,
            original_filename: evidence.original_filename,
            created_at: Utc::now(),
        };
        t.evidence.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<EvidenceObject> {
        self.tables
            .read()
            .evidence
            .get(&id)
            .filter(|e| e.tenant_id == ctx.tenant_id())
            .cloned()
            .ok_or(RepositoryError::NotFound("evidence"))
    }

    async fn find_by_key(&self, ctx: &TenantContext, object_key: &str) -> RepoResult<EvidenceObject> {
        self.tables
            .read()
            .evidence
            .values()
            .find(|e| e.object_key == object_key && e.tenant_id == ctx.tenant_id())
            .cloned()
            .ok_or(RepositoryError::NotFound("evidence"))
    }

    async fn list_for_verification(&self, ctx: &TenantContext, verification_id: Uuid) -> RepoResult<Vec<EvidenceObject>> {
        let t = self.tables.read();
        visible_verification(&t, ctx, verification_id)?;
        let mut rows: Vec<EvidenceObject> = t
            .evidence
            .values()
            .filter(|e| e.verification_id == verification_id && e.tenant_id == ctx.tenant_id())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<EvidenceObject> {
        let mut t = self.tables.write();
        match t.evidence.get(&id) {
            Some(e) if e.tenant_id == ctx.tenant_id() => {}
            _ => return Err(RepositoryError::NotFound("evidence")),
        }
        t.evidence.remove(&id).ok_or(RepositoryError::NotFound("evidence"))
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, entry: AuditEntry) -> RepoResult<i64> {
        let mut t = self.tables.write();
        let id = t.audit.last().map_or(1, |e| e.id + 1);
        t.audit.push(AuditEvent {
            id,
            tenant_id: entry.tenant_id,
            actor_id: entry.actor_id,
            action: entry.action,
            target_type: entry.target_type,
            target_id: entry.target_id,
            client_ip: entry.client_ip,
            user_agent: entry.user_agent,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list(
        &self,
        ctx: &TenantContext,
        action_prefix: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> RepoResult<(Vec<AuditEvent>, i64)> {
        let t = self.tables.read();
        let matching: Vec<&AuditEvent> = t
            .audit
            .iter()
            .rev()
            .filter(|e| e.tenant_id == Some(ctx.tenant_id()))
            .filter(|e| action_prefix.map_or(true, |p| e.action.starts_with(p)))
            .collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert(&self, ctx: &TenantContext, payment: NewPayment) -> RepoResult<Payment> {
        let row = Payment {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            user_id: payment.user_id,
            method: payment.method,
            amount: payment.amount,
            status: payment.status,
            reference: payment.reference,
            created_at: Utc::now(),
        };
        self.tables.write().payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_for_user(&self, ctx: &TenantContext, user_id: Uuid) -> RepoResult<Vec<Payment>> {
        let mut rows: Vec<Payment> = self
            .tables
            .read()
            .payments
            .values()
            .filter(|p| p.tenant_id == ctx.tenant_id() && p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
