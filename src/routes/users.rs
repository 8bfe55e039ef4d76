use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::tenant::AdminContext,
    models::{
        auth::ClientInfo,
        tenant::TenantContext,
        user::{ChangeRoleRequest, ChangeStatusRequest, ProfileUpdate, UserProfile},
    },
    services::auth::AuthService,
    state::AppState,
};

/// Only `full_name`, `phone` and `notes` are accepted; other fields fail to deserialize.
pub async fn update_me(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Json(body): Json<ProfileUpdate>,
) -> AppResult<Json<UserProfile>> {
    let user = AuthService::update_profile(&state.repos, &ctx, &body, &client).await?;
    Ok(Json(user.into()))
}

pub async fn list_users(
    State(state): State<AppState>,
    AdminContext(ctx): AdminContext,
) -> AppResult<Json<Vec<UserProfile>>> {
    let users = AuthService::list_users(&state.repos, &ctx).await?;
    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}

pub async fn change_role(
    State(state): State<AppState>,
    AdminContext(ctx): AdminContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeRoleRequest>,
) -> AppResult<Json<UserProfile>> {
    let user = AuthService::set_role(&state.repos, &ctx, id, body.role, &client).await?;
    Ok(Json(user.into()))
}

pub async fn change_status(
    State(state): State<AppState>,
    AdminContext(ctx): AdminContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeStatusRequest>,
) -> AppResult<Json<UserProfile>> {
    let user = AuthService::set_status(&state.repos, &ctx, id, body.status, &client).await?;
    Ok(Json(user.into()))
}
