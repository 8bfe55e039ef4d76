use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::AppResult,
    middleware::tenant::AdminContext,
    models::audit::AuditQuery,
    services::audit::{AuditLog, AuditPage},
    state::AppState,
};

/// Admin only. Read-only: the audit log has no write or delete routes.
pub async fn list_audit_log(
    State(state): State<AppState>,
    AdminContext(ctx): AdminContext,
    Query(params): Query<AuditQuery>,
) -> AppResult<Json<AuditPage>> {
    Ok(Json(AuditLog::list(state.repos.audit.as_ref(), &ctx, &params).await?))
}
