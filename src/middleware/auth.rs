use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    error::AppError,
    models::auth::AuthenticatedUser,
    services::auth::AuthService,
    state::AppState,
};

/// Bearer token from the `Authorization` header, validated on every request.
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let user = AuthService::validate(&state.config, token.trim())?;

        // Cross-tenant IDOR prevention: an explicit X-Tenant header must name
        // the tenant carried by the token.
        if let Some(x_tenant) = parts.headers.get("X-Tenant").and_then(|v| v.to_str().ok()) {
            if x_tenant.trim().parse::<uuid::Uuid>().ok() != Some(user.tenant_id) {
                return Err(AppError::Forbidden("tenant mismatch"));
            }
        }

        Ok(user)
    }
}
