use axum::{extract::State, http::StatusCode, Json};

use crate::{
    error::AppResult,
    middleware::rate_limit::check_rate_limit,
    models::{
        auth::ClientInfo,
        tenant::SignupRequest,
        user::{LoginResponse, ProfileFields, UserRole},
    },
    services::{auth::AuthService, tenants::TenantRegistry},
    state::AppState,
};

/// Create a tenant together with its first admin, and log that admin in.
pub async fn signup(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<LoginResponse>)> {
    if let (Some(redis), Some(ip)) = (&state.redis, &client.ip) {
        let mut redis = redis.clone();
        // 5 signups/hour per IP
        check_rate_limit(&mut redis, &format!("rate:signup:ip:{ip}"), 5, 3600).await?;
    }

    let tenant = TenantRegistry::create(&state.repos, &body.tenant_name).await?;
    let admin = AuthService::register(
        &state.repos,
        &state.config,
        tenant.id,
        &body.email,
        &body.password,
        ProfileFields { full_name: body.full_name, phone: body.phone, notes: None },
        UserRole::Admin,
        &client,
    )
    .await?;

    let session = AuthService::issue_token(&state.config, &admin)?;
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            access_token: session.access_token,
            token_type: "Bearer",
            expires_in: session.expires_in,
            user: admin.into(),
        }),
    ))
}
