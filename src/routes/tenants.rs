use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::operator::OperatorAuth,
    models::tenant::{ChangeTenantStatusRequest, Tenant},
    services::tenants::TenantRegistry,
    state::AppState,
};

pub async fn get_tenant(
    State(state): State<AppState>,
    _op: OperatorAuth,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Tenant>> {
    Ok(Json(TenantRegistry::get(&state.repos, id).await?))
}

/// Suspending a tenant locks out its tokens and logins on the next request.
pub async fn change_status(
    State(state): State<AppState>,
    _op: OperatorAuth,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeTenantStatusRequest>,
) -> AppResult<Json<Tenant>> {
    let tenant = TenantRegistry::set_status(&state.repos, id, body.status).await?;
    tracing::info!(tenant = %tenant.id, status = %tenant.status, "tenant status changed by operator");
    Ok(Json(tenant))
}
