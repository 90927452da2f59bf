// src/models/boleto.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// --- Enums (Mapeando o Postgres) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "boleto_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoletoStatus {
    Registered, // Registrado, aguardando pagamento
    Paid,       // Liquidado (imutável a partir daqui)
    Overdue,    // Vencido (derivado, nunca gravado diretamente)
    Canceled,   // Cancelado pelo usuário
}

// --- Structs ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Boleto {
    pub id: Uuid,

    #[serde(skip_serializing)]
    pub tenant_id: Uuid,

    /// Linha numérica de 44 dígitos, exatamente como lida do código de barras.
    pub barcode: String,

    pub amount: Decimal,
    pub due_date: NaiveDate,

    pub payee_name: String,
    pub payee_document: Option<String>,

    pub status: BoletoStatus,

    // Vínculo opcional com um agendamento de pagamento
    pub schedule_id: Option<Uuid>,

    pub created_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Boleto {
    /// Status efetivo na data informada. `Overdue` nunca é persistido:
    /// um boleto registrado e vencido é Overdue só enquanto não for pago.
    pub fn effective_status(&self, today: NaiveDate) -> BoletoStatus {
        match self.status {
            BoletoStatus::Registered if today > self.due_date => BoletoStatus::Overdue,
            other => other,
        }
    }
}

/// Resultado do decode puro do código de barras (antes de persistir).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBoleto {
    pub amount: Decimal,
    pub due_date: NaiveDate,
    /// Código do banco emissor (3 primeiros dígitos); chave para o
    /// enriquecimento de beneficiário, que pode falhar sem impedir o registro.
    pub payee_ref: String,
}

/// Liquidação calculada para um par (boleto, data de pagamento).
/// Derivado, nunca a fonte de verdade: recalcular com as mesmas entradas
/// produz exatamente os mesmos valores, centavo a centavo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub original_amount: Decimal,
    pub fine: Decimal,
    pub interest: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    /// Negativo quando pago antes do vencimento.
    pub days_overdue: i64,
}

// --- Payloads ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBoletoPayload {
    #[validate(length(equal = 44, message = "O código de barras deve ter exatamente 44 dígitos."))]
    pub barcode: String,

    pub schedule_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PayBoletoPayload {
    /// Data do pagamento; se ausente, assume hoje.
    pub payment_date: Option<NaiveDate>,
}
