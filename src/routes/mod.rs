pub mod audit_log;
pub mod auth;
pub mod evidence;
pub mod health;
pub mod payments;
pub mod signup;
pub mod tenants;
pub mod users;
pub mod verifications;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;

/// Multipart framing allowance on top of the evidence size limit, so an
/// oversized file still reaches the service check.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/signup", post(signup::signup))
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", post(auth::change_password))
        // Users
        .route("/users/me", put(users::update_me).patch(users::update_me))
        .route("/admin/users", get(users::list_users))
        .route("/admin/users/{id}/role", put(users::change_role))
        .route("/admin/users/{id}/status", put(users::change_status))
        // Verifications
        .route(
            "/verifications",
            get(verifications::list_verifications).post(verifications::create_verification),
        )
        .route(
            "/verifications/{id}",
            get(verifications::get_verification).delete(verifications::delete_verification),
        )
        .route("/verifications/{id}/status", put(verifications::update_status))
        .route(
            "/verifications/{id}/pii",
            get(verifications::read_pii).put(verifications::attach_pii),
        )
        // Evidence
        .route(
            "/verifications/{id}/evidence",
            get(evidence::list_evidence).post(evidence::upload_evidence),
        )
        .route(
            "/evidence/{id}",
            get(evidence::download_evidence).delete(evidence::delete_evidence),
        )
        .route("/evidence/{id}/presigned-url", get(evidence::presigned_url))
        .route("/evidence/files/{*key}", get(evidence::serve_signed_file))
        // Payments
        .route("/payments", get(payments::list_payments).post(payments::create_payment))
        // Audit
        .route("/audit-log", get(audit_log::list_audit_log))
        // Operator
        .route("/operator/tenants/{id}", get(tenants::get_tenant))
        .route("/operator/tenants/{id}/status", put(tenants::change_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
