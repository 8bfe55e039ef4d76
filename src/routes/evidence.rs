use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::ClientInfo,
        evidence::{EvidenceObject, PresignQuery, PresignedUrl, SignedFileQuery},
        tenant::TenantContext,
    },
    services::evidence::{EvidenceFile, EvidenceService, Upload},
    state::AppState,
};

fn multipart_error(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::Validation(e.body_text())
    }
}

/// Evidence is always served as a download with the media type stored at upload.
fn file_response(file: EvidenceFile) -> AppResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.media_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.file_name),
        )
        .header(header::CACHE_CONTROL, "private, no-store")
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .body(Body::from(file.bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Multipart upload; the file is read from the `file` field.
pub async fn upload_evidence(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(verification_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<EvidenceObject>)> {
    let limit = state.config.max_upload_bytes;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        upload = Some(Upload { bytes, content_type, filename });
    }

    let upload = upload.ok_or_else(|| AppError::Validation("No file field in upload".into()))?;
    let row = EvidenceService::upload(
        &state.repos,
        state.blobs.as_ref(),
        &state.config,
        &ctx,
        verification_id,
        upload,
        &client,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn list_evidence(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(verification_id): Path<Uuid>,
) -> AppResult<Json<Vec<EvidenceObject>>> {
    Ok(Json(EvidenceService::list(&state.repos, &ctx, verification_id).await?))
}

pub async fn download_evidence(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let file = EvidenceService::download(
        &state.repos,
        state.blobs.as_ref(),
        state.storage_timeout(),
        &ctx,
        id,
        &client,
    )
    .await?;
    file_response(file)
}

pub async fn delete_evidence(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    EvidenceService::delete(
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

pub async fn presigned_url(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Path(id): Path<Uuid>,
    Query(query): Query<PresignQuery>,
) -> AppResult<Json<PresignedUrl>> {
    let url = EvidenceService::presigned_url(
        &state.repos,
        state.blobs.as_ref(),
        &state.config,
        &ctx,
        id,
        query.expires_in,
        &client,
    )
    .await?;
    Ok(Json(url))
}

/// Target of presigned URLs. No bearer token; the signature is checked instead.
pub async fn serve_signed_file(
    State(state): State<AppState>,
    client: ClientInfo,
    Path(key): Path<String>,
    Query(query): Query<SignedFileQuery>,
) -> AppResult<Response> {
    let file = EvidenceService::fetch_signed(
        &state.repos,
        state.blobs.as_ref(),
        &state.signer,
        state.storage_timeout(),
        &key,
        query.expires,
        &query.signature,
        &client,
    )
    .await?;
    file_response(file)
}
