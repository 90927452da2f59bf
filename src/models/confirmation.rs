// src/models/confirmation.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Enums ---

/// Fatores exigidos pela política para o valor da transação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "required_factors", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredFactors {
    None,
    VoiceOnly,
    VoiceAndBiometric,
}

/// Classificação de uma falha de confirmação (dirige a estratégia de
/// fallback). Hash porque o orçamento de retries é contado por razão.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    LowConfidence,
    AudioQuality,
    AllProvidersFailed,
    NetworkError,
    Timeout,
}

/// Estratégia escolhida após uma falha classificada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fallback_strategy", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackStrategy {
    Retry,
    PinFallback,
    Cancel,
}

/// Desfecho terminal de uma tentativa de confirmação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "confirmation_outcome", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationOutcome {
    Authorized,
    PinRequired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactorKind {
    Voice,
    Biometric,
}

/// Ação sendo confirmada; seleciona o conjunto de frases esperadas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationAction {
    Transfer,
    BoletoPayment,
}

// --- Structs ---

/// Resultado de um fator individual, anexado à tentativa conforme resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorOutcome {
    pub factor: FactorKind,
    pub success: bool,
    /// Confiança reportada (1.0 no atalho abaixo do limiar de valor).
    pub confidence: f64,
    pub transcript: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub resolved_at: DateTime<Utc>,
}

/// Registro de uma tentativa de confirmação.
/// Criado no início do fluxo, recebe fatores enquanto não-terminal e
/// congela assim que `overall` é definido (imutabilidade de auditoria).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationAttempt {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub amount: Decimal,
    pub required_factors: RequiredFactors,
    pub factor_outcomes: Vec<FactorOutcome>,
    pub overall: Option<ConfirmationOutcome>,
    pub fallback: Option<FallbackStrategy>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConfirmationAttempt {
    pub fn new(
        transaction_id: Uuid,
        tenant_id: Uuid,
        amount: Decimal,
        required_factors: RequiredFactors,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            tenant_id,
            amount,
            required_factors,
            factor_outcomes: Vec::new(),
            overall: None,
            fallback: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.overall.is_some()
    }
}

/// Decisão devolvida ao chamador pelo gate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub outcome: ConfirmationOutcome,
    pub confidence: f64,
    pub fallback: Option<FallbackStrategy>,
    /// Mensagem de orientação em português para o cenário classificado.
    pub guidance: Option<String>,
    pub attempt_id: Uuid,
}
