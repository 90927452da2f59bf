// src/handlers/pix.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use validator::{Validate, ValidationError};

use crate::{
    common::error::AppError,
    config::AppState,
    middleware::tenancy::TenantContext,
    services::pix_service::TransferOutcome,
};

fn validate_positive(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() || val.is_zero() {
        let mut err = ValidationError::new("range");
        err.message = Some("O valor deve ser maior que zero.".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PixTransferPayload {
    #[validate(length(min = 1, message = "A chave PIX é obrigatória."))]
    pub pix_key: String,

    #[validate(custom(function = "validate_positive"))]
    pub amount: Decimal,

    pub description: Option<String>,
}

// ---
// POST /api/pix/transfer
// ---
pub async fn transfer(
    State(app_state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<PixTransferPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate().map_err(AppError::ValidationError)?;

    let outcome = app_state
        .pix_service
        .transfer(&ctx, &payload.pix_key, payload.amount, payload.description)
        .await?;

    match outcome {
        TransferOutcome::Sent { receipt, decision } => Ok((
            StatusCode::OK,
            Json(json!({
                "receipt": receipt,
                "confidence": decision.confidence,
            })),
        )
            .into_response()),
        TransferOutcome::NotAuthorized(decision) => Ok((
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
