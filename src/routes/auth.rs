use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    middleware::rate_limit::{check_rate_limit, login_key, LOGIN_MAX_ATTEMPTS, LOGIN_WINDOW_SECS},
    models::{
        auth::ClientInfo,
        tenant::TenantContext,
        user::{ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, UserProfile, UserRole},
    },
    services::auth::AuthService,
    state::AppState,
};

pub async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserProfile>)> {
    let user = AuthService::register(
        &state.repos,
        &state.config,
        body.tenant_id,
        &body.email,
        &body.password,
        body.profile,
        UserRole::User,
        &client,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    // Rate limit: 5 attempts per 15 min per email
    if let Some(redis) = &state.redis {
        let mut redis = redis.clone();
        let key = login_key(&body.email);
        check_rate_limit(&mut redis, &key, LOGIN_MAX_ATTEMPTS, LOGIN_WINDOW_SECS).await?;
    }

    let (session, user) = AuthService::authenticate(
        &state.repos,
        &state.config,
        body.tenant_id,
        &body.email,
        &body.password,
        &client,
    )
    .await?;

    Ok(Json(LoginResponse {
        access_token: session.access_token,
        token_type: "Bearer",
        expires_in: session.expires_in,
        user: user.into(),
    }))
}

pub async fn me(State(state): State<AppState>, ctx: TenantContext) -> AppResult<Json<UserProfile>> {
    let user = AuthService::me(&state.repos, &ctx).await?;
    Ok(Json(user.into()))
}

pub async fn change_password(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    AuthService::change_password(
        &state.repos,
        &state.config,
        &ctx,
        &body.current_password,
        &body.new_password,
        &client,
    )
    .await?;
    Ok(Json(json!({ "message": "Password changed" })))
}
