use axum::{extract::State, http::StatusCode, Json};

use crate::{
    error::AppResult,
    models::{
        auth::ClientInfo,
        payment::{CreatePaymentRequest, Payment},
        tenant::TenantContext,
    },
    services::payments::PaymentService,
    state::AppState,
};

pub async fn create_payment(
    State(state): State<AppState>,
    ctx: TenantContext,
    client: ClientInfo,
    Json(body): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<Payment>)> {
    let payment = PaymentService::create(&state.repos, &ctx, &body, &client).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> AppResult<Json<Vec<Payment>>> {
    Ok(Json(PaymentService::list_mine(&state.repos, &ctx).await?))
}
