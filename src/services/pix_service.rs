// src/services/pix_service.rs
//
// Transferências PIX: o gate de confirmação autoriza e a ordem é entregue
// à rede de liquidação (caixa-preta externa). O serviço não guarda saldo
// nem estado de transação; isso é papel da rede.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    middleware::tenancy::TenantContext,
    models::{
        audit::NewAuditEntry,
        confirmation::{ConfirmationAction, ConfirmationOutcome, GateDecision},
    },
    services::{
        audit_service::AuditService,
        confirmation_service::{ConfirmationRequest, ConfirmationService, ProviderError},
    },
};

#[derive(Debug, Clone)]
pub struct PixTransferOrder {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub pix_key: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PixReceipt {
    pub end_to_end_id: String,
    pub status: String,
}

/// Rede de liquidação PIX, consumida após a autorização.
#[async_trait]
pub trait SettlementNetwork: Send + Sync {
    async fn send_transfer(&self, order: &PixTransferOrder) -> Result<PixReceipt, ProviderError>;
}

#[derive(Debug)]
pub enum TransferOutcome {
    Sent {
        receipt: PixReceipt,
        decision: GateDecision,
    },
    NotAuthorized(GateDecision),
}

#[derive(Clone)]
pub struct PixService {
    network: Arc<dyn SettlementNetwork>,
    gate: ConfirmationService,
    audit: AuditService,
}

impl PixService {
    pub fn new(
        network: Arc<dyn SettlementNetwork>,
        gate: ConfirmationService,
        audit: AuditService,
    ) -> Self {
        Self { network, gate, audit }
    }

    pub async fn transfer(
        &self,
        ctx: &TenantContext,
        pix_key: &str,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<TransferOutcome, AppError> {
        let transaction_id = Uuid::new_v4();

        let decision = self
            .gate
            .confirm(
                ctx,
                ConfirmationRequest {
                    transaction_id,
                    action: ConfirmationAction::Transfer,
                    amount,
                },
            )
            .await?;

        if decision.outcome != ConfirmationOutcome::Authorized {
            return Ok(TransferOutcome::NotAuthorized(decision));
        }

        let order = PixTransferOrder {
            transaction_id,
            tenant_id: ctx.tenant_id(),
            pix_key: pix_key.to_string(),
            amount,
            description,
        };

        let sent = self.network.send_transfer(&order).await;

        // O envio é auditado nos dois desfechos, na mesma operação lógica.
        self.audit
            .record(
                ctx,
                NewAuditEntry {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                    action: "pix.transfer".to_string(),
                    resource_type: "pix_transfer".to_string(),
                    resource_id: Some(transaction_id),
                    before: None,
                    after: Some(json!({
                        "pixKey": order.pix_key,
                        "amount": order.amount,
                        "sent": sent.is_ok(),
                    })),
                    success: sent.is_ok(),
                    error_message: sent.as_ref().err().map(|e| e.to_string()),
                },
            )
            .await;

        let receipt = sent.map_err(|e| {
            anyhow::anyhow!("rede de liquidação recusou a transferência: {}", e)
        })?;

        Ok(TransferOutcome::Sent { receipt, decision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use rust_decimal_macros::dec;

    use crate::{
        models::confirmation::ConfirmationAttempt,
        services::{
            audit_service::AuditSink,
            confirmation_service::{
                AttemptStore, BiometricAssertion, BiometricProvider, GateConfig, SpeechProvider,
                VoiceCapture,
            },
        },
    };

    struct EchoSpeech;

    #[async_trait]
    impl SpeechProvider for EchoSpeech {
        async fn capture(&self, _id: Uuid, expected: &str) -> Result<VoiceCapture, ProviderError> {
            Ok(VoiceCapture { transcript: expected.to_string(), confidence: 0.9 })
        }
    }

    struct NoBiometric;

    #[async_trait]
    impl BiometricProvider for NoBiometric {
        async fn assert_identity(
            &self,
            _id: Uuid,
            _challenge: &[u8],
        ) -> Result<BiometricAssertion, ProviderError> {
            Ok(BiometricAssertion::Unsupported)
        }
    }

    #[derive(Default)]
    struct MemoryStore(Mutex<HashMap<Uuid, ConfirmationAttempt>>);

    #[async_trait]
    impl AttemptStore for MemoryStore {
        async fn create(&self, _ctx: &TenantContext, a: &ConfirmationAttempt) -> Result<(), AppError> {
            self.0.lock().unwrap().insert(a.id, a.clone());
            Ok(())
        }
        async fn save(&self, _ctx: &TenantContext, a: &ConfirmationAttempt) -> Result<(), AppError> {
            self.0.lock().unwrap().insert(a.id, a.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<NewAuditEntry>>);

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn append(&self, _ctx: &TenantContext, entry: NewAuditEntry) -> Result<(), AppError> {
            self.0.lock().unwrap().push(entry);
            Ok(())
        }
    }

    struct FakeNetwork {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SettlementNetwork for FakeNetwork {
        async fn send_transfer(&self, order: &PixTransferOrder) -> Result<PixReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PixReceipt {
                end_to_end_id: format!("E2E-{}", order.transaction_id),
                status: "SETTLED".to_string(),
            })
        }
    }

    fn pix_service(sink: Arc<MemorySink>) -> (PixService, Arc<FakeNetwork>) {
        let audit = AuditService::new(sink);
        let gate = ConfirmationService::new(
            GateConfig::default(),
            Arc::new(EchoSpeech),
            Arc::new(NoBiometric),
            Arc::new(MemoryStore::default()),
            audit.clone(),
        );
        let network = Arc::new(FakeNetwork { calls: AtomicUsize::new(0) });
        (PixService::new(network.clone(), gate, audit), network)
    }

    fn ctx() -> TenantContext {
        TenantContext::user_scoped(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn transferencia_pequena_dispensa_confirmacao_e_chega_na_rede() {
        let sink = Arc::new(MemorySink::default());
        let (service, network) = pix_service(sink.clone());

        let outcome = service
            .transfer(&ctx(), "maria@exemplo.br", dec!(50.00), None)
            .await
            .unwrap();

        match outcome {
            TransferOutcome::Sent { receipt, decision } => {
                assert_eq!(receipt.status, "SETTLED");
                assert_eq!(decision.confidence, 1.0);
            }
            other => panic!("esperava Sent, veio {other:?}"),
        }
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);

        // Uma entrada do gate + uma do envio PIX.
        let entries = sink.0.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.action == "pix.transfer" && e.success));
    }

    #[tokio::test]
    async fn transferencia_alta_passa_pelo_fator_de_voz() {
        let sink = Arc::new(MemorySink::default());
        let (service, network) = pix_service(sink);

        let outcome = service
            .transfer(&ctx(), "11999990000", dec!(2500.00), Some("aluguel".to_string()))
            .await
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::Sent { .. }));
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    }
}
