// src/services/boleto_service.rs
//
// Orquestra o ciclo de vida do boleto: registro a partir do código de
// barras, pagamento (gate de confirmação -> cálculo de liquidação ->
// transição de status) e cancelamento. Toda escrita roda sob a sessão
// escopada do tenant e deixa rastro na auditoria.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{BoletoRepository, ScopedSession},
    middleware::tenancy::TenantContext,
    models::{
        audit::NewAuditEntry,
        boleto::{Boleto, SettlementResult},
        confirmation::{ConfirmationAction, ConfirmationOutcome, GateDecision},
    },
    services::{
        audit_service::AuditService,
        boleto_decoder::decode_barcode,
        confirmation_service::{ConfirmationRequest, ConfirmationService, ProviderError},
        settlement::settle,
    },
};

/// Nome usado quando o enriquecimento do beneficiário está indisponível.
/// Não é falha: o boleto continua registrável.
const UNKNOWN_PAYEE: &str = "Beneficiário não identificado";

#[derive(Debug, Clone)]
pub struct PayeeInfo {
    pub name: String,
    pub document: Option<String>,
}

/// Serviço de enriquecimento de beneficiário (colaborador externo).
#[async_trait]
pub trait PayeeDirectory: Send + Sync {
    async fn lookup(&self, payee_ref: &str) -> Result<PayeeInfo, ProviderError>;
}

/// Desfecho de um pedido de pagamento.
#[derive(Debug)]
pub enum PaymentOutcome {
    /// Autorizado e liquidado.
    Settled {
        boleto: Boleto,
        settlement: SettlementResult,
        decision: GateDecision,
    },
    /// O gate não autorizou; o chamador recebe a estratégia de fallback
    /// com orientação, nunca um erro técnico cru.
    NotAuthorized(GateDecision),
}

#[derive(Clone)]
pub struct BoletoService {
    pool: PgPool,
    repo: BoletoRepository,
    gate: ConfirmationService,
    audit: AuditService,
    payees: Arc<dyn PayeeDirectory>,
}

impl BoletoService {
    pub fn new(
        pool: PgPool,
        repo: BoletoRepository,
        gate: ConfirmationService,
        audit: AuditService,
        payees: Arc<dyn PayeeDirectory>,
    ) -> Self {
        Self { pool, repo, gate, audit, payees }
    }

    /// Registra um boleto a partir da linha de 44 dígitos.
    pub async fn register(
        &self,
        ctx: &TenantContext,
        barcode: &str,
        schedule_id: Option<Uuid>,
    ) -> Result<Boleto, AppError> {
        let decoded = decode_barcode(barcode)?;

        let payee = match self.payees.lookup(&decoded.payee_ref).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(payee_ref = %decoded.payee_ref, error = %e,
                    "Enriquecimento de beneficiário indisponível; usando placeholder");
                PayeeInfo { name: UNKNOWN_PAYEE.to_string(), document: None }
            }
        };

        let mut session = ScopedSession::bind(&self.pool, ctx).await?;
        let boleto = self
            .repo
            .create(
                session.conn(),
                ctx.tenant_id(),
                barcode,
                decoded.amount,
                decoded.due_date,
                &payee.name,
                payee.document.as_deref(),
                schedule_id,
            )
            .await?;

        self.audit
            .record(
                ctx,
                NewAuditEntry {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                    action: "boleto.register".to_string(),
                    resource_type: "boleto".to_string(),
                    resource_id: Some(boleto.id),
                    before: None,
                    after: Some(json!({
                        "amount": boleto.amount,
                        "dueDate": boleto.due_date,
                        "payeeName": boleto.payee_name,
                    })),
                    success: true,
                    error_message: None,
                },
            )
            .await;

        Ok(boleto)
    }

    /// Paga um boleto: gate de confirmação, cálculo de liquidação e
    /// transição Registered -> Paid dentro de uma transação escopada.
    pub async fn pay(
        &self,
        ctx: &TenantContext,
        boleto_id: Uuid,
        payment_date: Option<NaiveDate>,
    ) -> Result<PaymentOutcome, AppError> {
        let payment_date = payment_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut session = ScopedSession::bind(&self.pool, ctx).await?;
        let boleto = self
            .repo
            .find_by_id(session.conn(), ctx.tenant_id(), boleto_id)
            .await?
            .ok_or(AppError::BoletoNotFound)?;

        // O valor devido na data decide se a confirmação é exigida.
        let settlement = settle(&boleto, payment_date)?;

        let decision = self
            .gate
            .confirm(
                ctx,
                ConfirmationRequest {
                    transaction_id: boleto.id,
                    action: ConfirmationAction::BoletoPayment,
                    amount: settlement.total,
                },
            )
            .await?;

        if decision.outcome != ConfirmationOutcome::Authorized {
            return Ok(PaymentOutcome::NotAuthorized(decision));
        }

        // Transação escopada: o vínculo do tenant é reafirmado lá dentro.
        let mut tx = session.begin().await?;
        let paid = self
            .repo
            .mark_paid(tx.conn(), ctx.tenant_id(), boleto.id)
            .await?;
        tx.commit().await?;

        self.audit
            .record(
                ctx,
                NewAuditEntry {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                    action: "boleto.pay".to_string(),
                    resource_type: "boleto".to_string(),
                    resource_id: Some(paid.id),
                    before: Some(json!({ "status": boleto.status })),
                    after: Some(json!({
                        "status": paid.status,
                        "settlement": settlement,
                        "paymentDate": payment_date,
                    })),
                    success: true,
                    error_message: None,
                },
            )
            .await;

        Ok(PaymentOutcome::Settled { boleto: paid, settlement, decision })
    }

    pub async fn cancel(&self, ctx: &TenantContext, boleto_id: Uuid) -> Result<Boleto, AppError> {
        let mut session = ScopedSession::bind(&self.pool, ctx).await?;

        // Id inexistente (ou invisível para o tenant) é 404; só um boleto
        // encontrado mas fora de REGISTERED vira conflito.
        self.repo
            .find_by_id(session.conn(), ctx.tenant_id(), boleto_id)
            .await?
            .ok_or(AppError::BoletoNotFound)?;

        let canceled = self
            .repo
            .mark_canceled(session.conn(), ctx.tenant_id(), boleto_id)
            .await?;

        self.audit
            .record(
                ctx,
                NewAuditEntry {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                    action: "boleto.cancel".to_string(),
                    resource_type: "boleto".to_string(),
                    resource_id: Some(canceled.id),
                    before: None,
                    after: Some(json!({ "status": canceled.status })),
                    success: true,
                    error_message: None,
                },
            )
            .await;

        Ok(canceled)
    }

    /// Lista os boletos do tenant com o status efetivo na data corrente:
    /// um registrado e vencido aparece como OVERDUE sem nunca gravar esse
    /// estado no banco.
    pub async fn list(&self, ctx: &TenantContext) -> Result<Vec<Boleto>, AppError> {
        let mut session = ScopedSession::bind(&self.pool, ctx).await?;
        let today = Utc::now().date_naive();

        let mut boletos = self.repo.list_by_tenant(session.conn(), ctx.tenant_id()).await?;
        for boleto in &mut boletos {
            boleto.status = boleto.effective_status(today);
        }
        Ok(boletos)
    }
}
