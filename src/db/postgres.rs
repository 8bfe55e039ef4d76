//! Postgres repositories.
//!
//! Tenant-scoped statements run inside `begin_scoped` so the row-level-security
//! policies see the tenant, and every statement still filters on `tenant_id`
//! itself. Either layer alone keeps tenants apart.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    map_sqlx_error,
    tenant::{begin_for_tenant, begin_login_lookup, begin_scoped},
};
use crate::{
    models::{
        audit::{AuditEntry, AuditEvent},
        evidence::{EvidenceObject, NewEvidence},
        payment::{NewPayment, Payment},
        tenant::{Tenant, TenantContext, TenantStatus},
        user::{NewUser, ProfileUpdate, User, UserRole, UserStatus},
        verification::{SubjectPii, Verification},
    },
    repository::{
        AuditRepository, EvidenceRepository, PaymentRepository, RepoResult, RepositoryError,
        TenantRepository, UserRepository, VerificationRepository,
    },
};

const TENANT_COLS: &str = "id, name, status, created_at";

const USER_COLS: &str = "id, tenant_id, email, password_hash, role, status, full_name, phone, notes,
     created_at, updated_at";

const VERIFICATION_COLS: &str = "id, tenant_id, subject_id, status, created_at, updated_at";

const EVIDENCE_COLS: &str = "id, tenant_id, verification_id, object_key, media_type, size_bytes,
     original_filename, created_at";

const AUDIT_COLS: &str = "id, tenant_id, actor_id, action, target_type, target_id, client_ip,
     user_agent, created_at";

const PAYMENT_COLS: &str = "id, tenant_id, user_id, method, amount, status, reference, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn scoped(&self, ctx: &TenantContext) -> RepoResult<Transaction<'static, Postgres>> {
        begin_scoped(&self.pool, ctx).await.map_err(map_sqlx_error)
    }

    /// Tenantless failed-login row. No policy lets it be read back, so the id
    /// is drawn first instead of using RETURNING.
    async fn append_unattributed(&self, entry: AuditEntry) -> RepoResult<i64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('audit_event', 'id'))")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        sqlx::query(
            "INSERT INTO audit_event
             (id, tenant_id, actor_id, action, target_type, target_id, client_ip, user_agent)
             VALUES ($1, NULL, NULL, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.client_ip)
        .bind(&entry.user_agent)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(id)
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> RepoResult<()> {
    tx.commit().await.map_err(map_sqlx_error)
}

#[async_trait]
impl TenantRepository for PgStore {
    async fn insert(&self, name: &str) -> RepoResult<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!(
            "INSERT INTO tenant (name) VALUES ($1) RETURNING {TENANT_COLS}"
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            RepositoryError::Conflict(_) => {
                RepositoryError::Conflict(format!("tenant name '{name}' is taken"))
            }
            other => other,
        })
    }

    async fn insert_if_absent(&self, name: &str) -> RepoResult<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(&format!(
            "INSERT INTO tenant (name) VALUES ($1)
             ON CONFLICT (name) DO NOTHING
             RETURNING {TENANT_COLS}"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn get(&self, id: Uuid) -> RepoResult<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!("SELECT {TENANT_COLS} FROM tenant WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepositoryError::NotFound("tenant"))
    }

    async fn find_by_name(&self, name: &str) -> RepoResult<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!("SELECT {TENANT_COLS} FROM tenant WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepositoryError::NotFound("tenant"))
    }

    async fn set_status(&self, id: Uuid, status: TenantStatus) -> RepoResult<Tenant> {
        sqlx::query_as::<_, Tenant>(&format!(
            "UPDATE tenant SET status = $2 WHERE id = $1 RETURNING {TENANT_COLS}"
        ))
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("tenant"))
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert(&self, ctx: &TenantContext, user: NewUser) -> RepoResult<User> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (tenant_id, email, password_hash, role, full_name, phone, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {USER_COLS}"
        ))
        .bind(ctx.tenant_id())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(&user.profile.full_name)
        .bind(&user.profile.phone)
        .bind(&user.profile.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict("email already registered".into()),
            other => other,
        })?;
        commit(tx).await?;
        Ok(row)
    }

    async fn find_by_email(&self, tenant_id: Option<Uuid>, email: &str) -> RepoResult<Vec<User>> {
        let mut tx = match tenant_id {
            Some(tid) => begin_for_tenant(&self.pool, tid).await,
            None => begin_login_lookup(&self.pool, email).await,
        }
        .map_err(map_sqlx_error)?;
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users
             WHERE email = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             ORDER BY created_at"
        ))
        .bind(email)
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(rows)
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<User> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        row.ok_or(RepositoryError::NotFound("user"))
    }

    async fn list(&self, ctx: &TenantContext) -> RepoResult<Vec<User>> {
        let mut tx = self.scoped(ctx).await?;
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE tenant_id = $1 ORDER BY email"
        ))
        .bind(ctx.tenant_id())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(rows)
    }

    async fn update_profile(&self, ctx: &TenantContext, id: Uuid, update: &ProfileUpdate) -> RepoResult<User> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET full_name = COALESCE($3, full_name),
                 phone = COALESCE($4, phone),
                 notes = COALESCE($5, notes),
                 updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2
             RETURNING {USER_COLS}"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .bind(&update.full_name)
        .bind(&update.phone)
        .bind(&update.notes)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        row.ok_or(RepositoryError::NotFound("user"))
    }

    async fn set_password_hash(&self, ctx: &TenantContext, id: Uuid, password_hash: &str) -> RepoResult<()> {
        let mut tx = self.scoped(ctx).await?;
        let res = sqlx::query(
            "UPDATE users SET password_hash = $3, updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(ctx.tenant_id())
        .bind(password_hash)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if res.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("user"));
        }
        commit(tx).await
    }

    async fn set_role(&self, ctx: &TenantContext, id: Uuid, role: UserRole) -> RepoResult<User> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $3, updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2
             RETURNING {USER_COLS}"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .bind(role.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        row.ok_or(RepositoryError::NotFound("user"))
    }

    async fn set_status(&self, ctx: &TenantContext, id: Uuid, status: UserStatus) -> RepoResult<User> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET status = $3, updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2
             RETURNING {USER_COLS}"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .bind(status.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        row.ok_or(RepositoryError::NotFound("user"))
    }
}

#[async_trait]
impl VerificationRepository for PgStore {
    async fn create(&self, ctx: &TenantContext, subject_id: &str) -> RepoResult<Verification> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, Verification>(&format!(
            "INSERT INTO verification (tenant_id, subject_id, status)
             VALUES ($1, $2, 'pending')
             RETURNING {VERIFICATION_COLS}"
        ))
        .bind(ctx.tenant_id())
        .bind(subject_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(row)
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<Verification> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, Verification>(&format!(
            "SELECT {VERIFICATION_COLS} FROM verification WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("verification"))?;
        commit(tx).await?;
        Ok(row)
    }

    async fn list(&self, ctx: &TenantContext) -> RepoResult<Vec<Verification>> {
        let mut tx = self.scoped(ctx).await?;
        let rows = sqlx::query_as::<_, Verification>(&format!(
            "SELECT {VERIFICATION_COLS} FROM verification
             WHERE tenant_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(ctx.tenant_id())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(rows)
    }

    async fn transition_status(&self, ctx: &TenantContext, id: Uuid, from: &str, to: &str) -> RepoResult<Verification> {
        let mut tx = self.scoped(ctx).await?;
        let updated = sqlx::query_as::<_, Verification>(&format!(
            "UPDATE verification SET status = $4, updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND status = $3
             RETURNING {VERIFICATION_COLS}"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .bind(from)
        .bind(to)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let row = match updated {
            Some(row) => row,
            None => {
                let current: Option<String> = sqlx::query_scalar(
                    "SELECT status FROM verification WHERE id = $1 AND tenant_id = $2",
                )
                .bind(id)
                .bind(ctx.tenant_id())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                return Err(match current {
                    None => RepositoryError::NotFound("verification"),
                    Some(s) => RepositoryError::Conflict(format!("verification is '{s}', expected '{from}'")),
                });
            }
        };
        commit(tx).await?;
        Ok(row)
    }

    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<Vec<String>> {
        let mut tx = self.scoped(ctx).await?;
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT object_key FROM evidence_object
             WHERE verification_id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(ctx.tenant_id())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        // subject_pii and evidence_object rows go with it (ON DELETE CASCADE)
        let res = sqlx::query("DELETE FROM verification WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(ctx.tenant_id())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if res.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("verification"));
        }
        commit(tx).await?;
        Ok(keys)
    }

    async fn upsert_pii(&self, ctx: &TenantContext, pii: &SubjectPii) -> RepoResult<()> {
        let mut tx = self.scoped(ctx).await?;
        let res = sqlx::query(
            "INSERT INTO subject_pii (verification_id, full_name, dob, id_number, address, phone)
             SELECT $1, $2, $3, $4, $5, $6
             WHERE EXISTS (SELECT 1 FROM verification WHERE id = $1 AND tenant_id = $7)
             ON CONFLICT (verification_id) DO UPDATE
             SET full_name = EXCLUDED.full_name,
                 dob = EXCLUDED.dob,
                 id_number = EXCLUDED.id_number,
                 address = EXCLUDED.address,
                 phone = EXCLUDED.phone",
        )
        .bind(pii.verification_id)
        .bind(&pii.full_name)
        .bind(&pii.dob)
        .bind(&pii.id_number)
        .bind(&pii.address)
        .bind(&pii.phone)
        .bind(ctx.tenant_id())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if res.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("verification"));
        }
        commit(tx).await
    }

    async fn get_pii(&self, ctx: &TenantContext, verification_id: Uuid) -> RepoResult<SubjectPii> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, SubjectPii>(
            "SELECT p.verification_id, p.full_name, p.dob, p.id_number, p.address, p.phone
             FROM subject_pii p
             JOIN verification v ON v.id = p.verification_id
             WHERE p.verification_id = $1 AND v.tenant_id = $2",
        )
        .bind(verification_id)
        .bind(ctx.tenant_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("subject pii"))?;
        commit(tx).await?;
        Ok(row)
    }
}

#[async_trait]
impl EvidenceRepository for PgStore {
    async fn insert(&self, ctx: &TenantContext, evidence: NewEvidence) -> RepoResult<EvidenceObject> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, EvidenceObject>(&format!(
            "INSERT INTO evidence_object
             (tenant_id, verification_id, object_key, media_type, size_bytes, original_filename)
             SELECT $1, $2, $3, $4, $5, $6
             WHERE EXISTS (SELECT 1 FROM verification WHERE id = $2 AND tenant_id = $1)
             RETURNING {EVIDENCE_COLS}"
        ))
        .bind(ctx.tenant_id())
        .bind(evidence.verification_id)
        .bind(&evidence.object_key)
        .bind(&evidence.media_type)
        .bind(evidence.size_bytes)
        .bind(&evidence.original_filename)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("verification"))?;
        commit(tx).await?;
        Ok(row)
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<EvidenceObject> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, EvidenceObject>(&format!(
            "SELECT {EVIDENCE_COLS} FROM evidence_object WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("evidence"))?;
        commit(tx).await?;
        Ok(row)
    }

    async fn find_by_key(&self, ctx: &TenantContext, object_key: &str) -> RepoResult<EvidenceObject> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, EvidenceObject>(&format!(
            "SELECT {EVIDENCE_COLS} FROM evidence_object WHERE object_key = $1 AND tenant_id = $2"
        ))
        .bind(object_key)
        .bind(ctx.tenant_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("evidence"))?;
        commit(tx).await?;
        Ok(row)
    }

    async fn list_for_verification(&self, ctx: &TenantContext, verification_id: Uuid) -> RepoResult<Vec<EvidenceObject>> {
        let mut tx = self.scoped(ctx).await?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM verification WHERE id = $1 AND tenant_id = $2)",
        )
        .bind(verification_id)
        .bind(ctx.tenant_id())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if !exists {
            return Err(RepositoryError::NotFound("verification"));
        }

        let rows = sqlx::query_as::<_, EvidenceObject>(&format!(
            "SELECT {EVIDENCE_COLS} FROM evidence_object
             WHERE verification_id = $1 AND tenant_id = $2
             ORDER BY created_at"
        ))
        .bind(verification_id)
        .bind(ctx.tenant_id())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(rows)
    }

    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> RepoResult<EvidenceObject> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, EvidenceObject>(&format!(
            "DELETE FROM evidence_object WHERE id = $1 AND tenant_id = $2
             RETURNING {EVIDENCE_COLS}"
        ))
        .bind(id)
        .bind(ctx.tenant_id())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepositoryError::NotFound("evidence"))?;
        commit(tx).await?;
        Ok(row)
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append(&self, entry: AuditEntry) -> RepoResult<i64> {
        let Some(tenant_id) = entry.tenant_id else {
            return self.append_unattributed(entry).await;
        };
        let mut tx = begin_for_tenant(&self.pool, tenant_id)
            .await
            .map_err(map_sqlx_error)?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO audit_event
             (tenant_id, actor_id, action, target_type, target_id, client_ip, user_agent)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(tenant_id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.client_ip)
        .bind(&entry.user_agent)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(id)
    }

    async fn list(
        &self,
        ctx: &TenantContext,
        action_prefix: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> RepoResult<(Vec<AuditEvent>, i64)> {
        let pattern = action_prefix.map(|p| format!("{}%", p.replace('%', "\\%").replace('_', "\\_")));
        let mut tx = self.scoped(ctx).await?;
        let rows = sqlx::query_as::<_, AuditEvent>(&format!(
            "SELECT {AUDIT_COLS} FROM audit_event
             WHERE tenant_id = $1 AND ($2::text IS NULL OR action LIKE $2)
             ORDER BY id DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(ctx.tenant_id())
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_event
             WHERE tenant_id = $1 AND ($2::text IS NULL OR action LIKE $2)",
        )
        .bind(ctx.tenant_id())
        .bind(&pattern)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok((rows, total))
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert(&self, ctx: &TenantContext, payment: NewPayment) -> RepoResult<Payment> {
        let mut tx = self.scoped(ctx).await?;
        let row = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (tenant_id, user_id, method, amount, status, reference)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {PAYMENT_COLS}"
        ))
        .bind(ctx.tenant_id())
        .bind(payment.user_id)
        .bind(&payment.method)
        .bind(payment.amount)
        .bind(&payment.status)
        .bind(&payment.reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(row)
    }

    async fn list_for_user(&self, ctx: &TenantContext, user_id: Uuid) -> RepoResult<Vec<Payment>> {
        let mut tx = self.scoped(ctx).await?;
        let rows = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments
             WHERE tenant_id = $1 AND user_id = $2
             ORDER BY created_at DESC"
        ))
        .bind(ctx.tenant_id())
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        commit(tx).await?;
        Ok(rows)
    }
}
