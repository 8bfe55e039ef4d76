//! Schema-level isolation checks against a real Postgres.
//!
//! Opt-in: point `DATABASE_URL` at a server as a superuser, then run
//! `cargo test --test postgres -- --ignored`. Each test gets a fresh
//! database with the migrations applied. The repositories run as a
//! plain NOLOGIN role so row-level security is not bypassed by superuser rights.

use kyc_vault::{
    db::tenant::{begin_for_tenant, begin_login_lookup},
    models::{
        auth::ClientInfo,
        evidence::NewEvidence,
        tenant::{Tenant, TenantContext},
        user::{NewUser, ProfileFields, User, UserRole},
        verification::{SubjectPii, Verification},
    },
    repository::{RepositoryError, Repositories},
    services::audit::{self, actions},
};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Executor, PgPool,
};
use uuid::Uuid;

const SET_APP_ROLE: &str = "SET ROLE kyc_vault_app";

const APP_ROLE_SETUP: &str = r#"
DO $$
BEGIN
    CREATE ROLE kyc_vault_app NOLOGIN NOSUPERUSER NOBYPASSRLS;
EXCEPTION WHEN duplicate_object OR unique_violation THEN NULL;
END $$;
GRANT USAGE ON SCHEMA public TO kyc_vault_app;
GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO kyc_vault_app;
GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA public TO kyc_vault_app;
"#;

/// Returns (owner pool, application pool). The owner pool keeps the
/// migration user's rights and is only used to look past the policies.
async fn pools(pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) -> (PgPool, PgPool) {
    let owner = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(connect_opts.clone())
        .await
        .unwrap();
    sqlx::raw_sql(APP_ROLE_SETUP).execute(&owner).await.unwrap();

    let app = pool_opts
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute(SET_APP_ROLE).await?;
                Ok(())
            })
        })
        .connect_with(connect_opts)
        .await
        .unwrap();

    let is_super: bool = sqlx::query_scalar("SELECT rolsuper FROM pg_roles WHERE rolname = current_user")
        .fetch_one(&app)
        .await
        .unwrap();
    assert!(!is_super, "application pool must not run as a superuser");
    (owner, app)
}

async fn tenant(repos: &Repositories, name: &str) -> (Tenant, TenantContext) {
    let t = repos.tenants.insert(name).await.unwrap();
    let ctx = TenantContext::system(t.id);
    (t, ctx)
}

async fn user(repos: &Repositories, ctx: &TenantContext, email: &str) -> User {
    repos
        .users
        .insert(
            ctx,
            NewUser {
                email: email.into(),
                password_hash: "not-a-real-hash".into(),
                role: UserRole::User,
                profile: ProfileFields { full_name: "Test Person".into(), ..Default::default() },
            },
        )
        .await
        .unwrap()
}

/// A verification with a PII row and one evidence pointer.
async fn populated_verification(repos: &Repositories, ctx: &TenantContext) -> (Verification, String) {
    let v = repos.verifications.create(ctx, "subject-1").await.unwrap();
    repos
        .verifications
        .upsert_pii(
            ctx,
            &SubjectPii {
                verification_id: v.id,
                full_name: vec![1, 2, 3],
                dob: vec![4, 5, 6],
                id_number: vec![7, 8, 9],
                address: None,
                phone: None,
            },
        )
        .await
        .unwrap();
    let key = format!("{}/{}/{}.png", ctx.tenant_id(), v.id, Uuid::new_v4());
    repos
        .evidence
        .insert(
            ctx,
            NewEvidence {
                verification_id: v.id,
                object_key: key.clone(),
                media_type: "image/png".into(),
                size_bytes: 3,
                original_filename: Some("id.png".into()),
            },
        )
        .await
        .unwrap();
    (v, key)
}

async fn count_as(pool: &PgPool, tenant_id: Uuid, table: &str) -> i64 {
    let mut tx = begin_for_tenant(pool, tenant_id).await.unwrap();
    let n: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
        .fetch_one(&mut *tx)
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    n
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn unfiltered_queries_see_only_the_bound_tenant(pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let (_owner, app) = pools(pool_opts, connect_opts).await;
    let repos = Repositories::postgres(app.clone());
    let (acme, acme_ctx) = tenant(&repos, "acme").await;
    let (globex, globex_ctx) = tenant(&repos, "globex").await;
    user(&repos, &acme_ctx, "alice@acme.test").await;
    let (v, _) = populated_verification(&repos, &acme_ctx).await;
    repos
        .audit
        .append(audit::system_entry(acme.id, actions::VERIFICATION_CREATE, "verification", v.id))
        .await
        .unwrap();

    // No WHERE tenant_id clause anywhere below.
    for table in ["users", "verification", "subject_pii", "evidence_object", "audit_event"] {
        assert_eq!(count_as(&app, globex.id, table).await, 0, "{table} leaked across tenants");
        assert_eq!(count_as(&app, acme.id, table).await, 1, "{table} hidden from its owner");
    }

    let mut tx = begin_for_tenant(&app, globex.id).await.unwrap();
    let updated = sqlx::query("UPDATE users SET role = 'admin'").execute(&mut *tx).await.unwrap();
    assert_eq!(updated.rows_affected(), 0);
    let deleted = sqlx::query("DELETE FROM verification").execute(&mut *tx).await.unwrap();
    assert_eq!(deleted.rows_affected(), 0);
    tx.commit().await.unwrap();

    // Writing a row stamped with another tenant fails the policy check.
    let mut tx = begin_for_tenant(&app, globex.id).await.unwrap();
    let forged = sqlx::query("INSERT INTO verification (tenant_id, subject_id) VALUES ($1, 'forged')")
        .bind(acme.id)
        .execute(&mut *tx)
        .await;
    assert!(forged.is_err());
    tx.rollback().await.unwrap();

    // Without any binding nothing is visible at all.
    let unbound: i64 = sqlx::query_scalar("SELECT count(*) FROM verification")
        .fetch_one(&app)
        .await
        .unwrap();
    assert_eq!(unbound, 0);

    assert!(matches!(
        repos.verifications.get(&globex_ctx, v.id).await,
        Err(RepositoryError::NotFound(_))
    ));
    assert_eq!(repos.verifications.get(&acme_ctx, v.id).await.unwrap().id, v.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn login_lookup_exposes_one_email_read_only(pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let (_owner, app) = pools(pool_opts, connect_opts).await;
    let repos = Repositories::postgres(app.clone());
    let (acme, acme_ctx) = tenant(&repos, "acme").await;
    let (_globex, globex_ctx) = tenant(&repos, "globex").await;
    user(&repos, &acme_ctx, "alice@example.test").await;
    user(&repos, &globex_ctx, "alice@example.test").await;
    user(&repos, &acme_ctx, "bob@example.test").await;

    let mut tx = begin_login_lookup(&app, "alice@example.test").await.unwrap();
    let visible: i64 = sqlx::query_scalar("SELECT count(*) FROM users").fetch_one(&mut *tx).await.unwrap();
    assert_eq!(visible, 2);
    let updated = sqlx::query("UPDATE users SET role = 'admin'").execute(&mut *tx).await.unwrap();
    assert_eq!(updated.rows_affected(), 0);
    tx.commit().await.unwrap();

    assert_eq!(repos.users.find_by_email(None, "alice@example.test").await.unwrap().len(), 2);
    let scoped = repos.users.find_by_email(Some(acme.id), "alice@example.test").await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].tenant_id, acme.id);
    assert!(repos.users.find_by_email(None, "carol@example.test").await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn audit_rows_cannot_be_changed_or_removed(pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let (owner, app) = pools(pool_opts, connect_opts).await;
    let repos = Repositories::postgres(app.clone());
    let (acme, _) = tenant(&repos, "acme").await;
    let id = repos
        .audit
        .append(audit::system_entry(acme.id, actions::TENANT_CREATE, "tenant", acme.id))
        .await
        .unwrap();

    for stmt in [
        "UPDATE audit_event SET action = 'tampered' WHERE id = $1",
        "DELETE FROM audit_event WHERE id = $1",
    ] {
        let mut tx = begin_for_tenant(&app, acme.id).await.unwrap();
        let res = sqlx::query(stmt).bind(id).execute(&mut *tx).await;
        assert!(res.is_err(), "{stmt} was accepted");
        tx.rollback().await.unwrap();

        // The trigger holds for the owner as well.
        let mut tx = begin_for_tenant(&owner, acme.id).await.unwrap();
        let res = sqlx::query(stmt).bind(id).execute(&mut *tx).await;
        assert!(res.is_err(), "{stmt} was accepted for the owner");
        tx.rollback().await.unwrap();
    }
    assert!(sqlx::query("TRUNCATE audit_event").execute(&owner).await.is_err());
    assert_eq!(count_as(&app, acme.id, "audit_event").await, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn unattributed_login_failures_are_insert_only(pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let (owner, app) = pools(pool_opts, connect_opts).await;
    let repos = Repositories::postgres(app.clone());

    let entry = audit::unattributed_login_failure("ghost@example.test", &ClientInfo::default());
    let id = repos.audit.append(entry).await.unwrap();

    let (tenant_id, action): (Option<Uuid>, String) =
        sqlx::query_as("SELECT tenant_id, action FROM audit_event WHERE id = $1")
            .bind(id)
            .fetch_one(&owner)
            .await
            .unwrap();
    assert_eq!(tenant_id, None);
    assert_eq!(action, actions::LOGIN_FAILED);

    // Not readable back through the application role.
    let visible: i64 = sqlx::query_scalar("SELECT count(*) FROM audit_event")
        .fetch_one(&app)
        .await
        .unwrap();
    assert_eq!(visible, 0);

    // Only failed logins may go in without a tenant.
    let other = sqlx::query(
        "INSERT INTO audit_event (action, target_type, target_id) VALUES ('verification.create', 'verification', 'x')",
    )
    .execute(&app)
    .await;
    assert!(other.is_err());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn deleting_a_verification_removes_its_pii_and_evidence(pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let (owner, app) = pools(pool_opts, connect_opts).await;
    let repos = Repositories::postgres(app.clone());
    let (_acme, ctx) = tenant(&repos, "acme").await;
    let (v, key) = populated_verification(&repos, &ctx).await;
    let (kept, _) = populated_verification(&repos, &ctx).await;

    let removed = repos.verifications.delete(&ctx, v.id).await.unwrap();
    assert_eq!(removed, vec![key]);

    // Counted with the owner's rights so the policies cannot hide survivors.
    for table in ["subject_pii", "evidence_object"] {
        let left: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {table} WHERE verification_id = $1"))
            .bind(v.id)
            .fetch_one(&owner)
            .await
            .unwrap();
        assert_eq!(left, 0, "{table} rows survived the delete");
    }
    assert!(repos.verifications.get_pii(&ctx, kept.id).await.is_ok());
    assert_eq!(repos.evidence.list_for_verification(&ctx, kept.id).await.unwrap().len(), 1);
    assert!(matches!(
        repos.verifications.delete(&ctx, v.id).await,
        Err(RepositoryError::NotFound(_))
    ));
}
