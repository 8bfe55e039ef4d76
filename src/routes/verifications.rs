use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        auth::ClientInfo,
        tenant::TenantContext,
        verification::{CreateVerificationRequest, PiiAttached, PiiFields, UpdateStatusRequest, Verification},
    },
    services::verifications::VerificationService,
    state::AppState,
};

pub async fn create_verification(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Json(body): Json<CreateVerificationRequest>,
) -> AppResult<(StatusCode, Json<Verification>)> {
    let v = VerificationService::create(&state.repos, &ctx, &body.subject_id, &client).await?;
    Ok((StatusCode::CREATED, Json(v)))
}

pub async fn list_verifications(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> AppResult<Json<Vec<Verification>>> {
    Ok(Json(VerificationService::list(&state.repos, &ctx).await?))
}

pub async fn get_verification(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Verification>> {
    Ok(Json(VerificationService::get(&state.repos, &ctx, id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> AppResult<Json<Verification>> {
    let v = VerificationService::update_status(&state.repos, &ctx, id, &body.status, &client).await?;
    Ok(Json(v))
}

pub async fn delete_verification(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    VerificationService::delete(
        &state.repos,
        state.blobs.as_ref(),
        state.storage_timeout(),
        &ctx,
        id,
        &client,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn attach_pii(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Json(body): Json<PiiFields>,
) -> AppResult<Json<PiiAttached>> {
    let attached = VerificationService::attach_pii(&state.repos, &state.cipher, &ctx, id, &body, &client).await?;
    Ok(Json(attached))
}

pub async fn read_pii(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PiiFields>> {
    let fields = VerificationService::read_pii(&state.repos, &state.cipher, &ctx, id, &client).await?;
    Ok(Json(fields))
}
