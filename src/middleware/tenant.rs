use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    error::AppError,
    models::{
        auth::AuthenticatedUser,
        tenant::TenantContext,
        user::{User, UserRole},
    },
    repository::RepositoryError,
    services::{auth::AuthService, tenants::TenantRegistry},
    state::AppState,
};

/// Resolve the tenant context for an authenticated request.
///
/// The tenant comes only from the validated token. An unknown or suspended
/// tenant is `Forbidden`; there is no fallback tenant. The principal is
/// re-read so suspensions and role changes apply before the token expires.
async fn resolve(parts: &mut Parts, state: &AppState) -> Result<(TenantContext, User), AppError> {
    let claims = AuthenticatedUser::from_request_parts(parts, state).await?;
    TenantRegistry::require_active(&state.repos, claims.tenant_id).await?;

    let ctx = TenantContext::for_principal(claims.tenant_id, claims.user_id);
    let user = state.repos.users.get(&ctx, claims.user_id).await.map_err(|e| match e {
        RepositoryError::NotFound(_) => AppError::Unauthorized,
        other => other.into(),
    })?;
    if !user.is_active() {
        return Err(AppError::Forbidden("account suspended"));
    }
    Ok((ctx, user))
}

impl FromRequestParts<AppState> for TenantContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await.map(|(ctx, _)| ctx)
    }
}

/// Tenant context of a principal whose current role is `admin`.
pub struct AdminContext(pub TenantContext);

impl FromRequestParts<AppState> for AdminContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (ctx, user) = resolve(parts, state).await?;
        let current = AuthenticatedUser {
            user_id: user.id,
            tenant_id: user.tenant_id,
            role: user.role(),
        };
        AuthService::require_role(&current, &[UserRole::Admin])?;
        Ok(AdminContext(ctx))
    }
}
