use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::tenant::TenantContext;

/// Session variable read by every row-level-security policy.
pub const TENANT_SETTING: &str = "app.current_tenant";

/// Open a transaction bound to the context's tenant.
///
/// The setting is transaction-local (`set_config(.., true)`), so it cannot leak
/// to the next borrower of the pooled connection. Policies compare against it
/// and match nothing when it is unset.
pub async fn begin_scoped(
    pool: &PgPool,
    ctx: &TenantContext,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    begin_for_tenant(pool, ctx.tenant_id()).await
}

pub async fn begin_for_tenant(
    pool: &PgPool,
    tenant_id: Uuid,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT set_config($1, $2, true)")
        .bind(TENANT_SETTING)
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Session variable naming the one email a pre-tenant login may read.
pub const LOGIN_EMAIL_SETTING: &str = "app.login_email";

/// Open a transaction for the login lookup: no tenant is bound, and the users
/// policy only exposes rows whose email equals `email`.
pub async fn begin_login_lookup(
    pool: &PgPool,
    email: &str,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT set_config($1, $2, true)")
        .bind(LOGIN_EMAIL_SETTING)
        .bind(email)
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}
