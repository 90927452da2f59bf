// src/handlers/boletos.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::TenantContext,
    models::boleto::{PayBoletoPayload, RegisterBoletoPayload},
    services::boleto_service::PaymentOutcome,
};

// ---
// POST /api/boletos — registra a partir do código de barras
// ---
pub async fn register_boleto(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<RegisterBoletoPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate().map_err(AppError::ValidationError)?;

    let boleto = app_state
        .boleto_service
        .register(&ctx, &payload.barcode, payload.schedule_id)
        .await?;

    Ok((StatusCode::CREATED, Json(boleto)))
}

// ---
// GET /api/boletos
// ---
pub async fn list_boletos(
    State(app_state): State<AppState>,
    ctx: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let boletos = app_state.boleto_service.list(&ctx).await?;
    Ok(Json(boletos))
}

// ---
// POST /api/boletos/{id}/pay
// ---
pub async fn pay_boleto(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<PayBoletoPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate().map_err(AppError::ValidationError)?;

    let outcome = app_state
        .boleto_service
        .pay(&ctx, id, payload.payment_date)
        .await?;

    match outcome {
        PaymentOutcome::Settled { boleto, settlement, decision } => Ok((
            StatusCode::OK,
            Json(json!({
                "boleto": boleto,
                "settlement": settlement,
                "confidence": decision.confidence,
            })),
        )
            .into_response()),
        // Não autorizado: devolve a estratégia de fallback com orientação,
        // nunca um erro técnico cru.
        PaymentOutcome::NotAuthorized(decision) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "outcome": decision.outcome,
                "fallback": decision.fallback,
                "guidance": decision.guidance,
            })),
        )
            .into_response()),
    }
}

// ---
// POST /api/boletos/{id}/cancel
// ---
pub async fn cancel_boleto(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let boleto = app_state.boleto_service.cancel(&ctx, id).await?;
    Ok(Json(boleto))
}
