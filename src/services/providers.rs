// src/services/providers.rs
//
// Adaptadores padrão dos colaboradores externos, usados pela raiz de
// composição quando nenhuma integração real está configurada. A integração
// com os provedores de verdade (STT, WebAuthn, PSP) mora fora deste núcleo
// e entra pelo mesmo conjunto de traits.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    models::confirmation::FailureReason,
    services::{
        boleto_service::{PayeeDirectory, PayeeInfo},
        confirmation_service::{
            BiometricAssertion, BiometricProvider, ProviderError, SpeechProvider, VoiceCapture,
        },
        pix_service::{PixReceipt, PixTransferOrder, SettlementNetwork},
    },
};

/// Sem provedor de fala configurado: toda captura falha com a tag
/// ALL_PROVIDERS_FAILED e o gate cai direto para o PIN. Preferível a
/// autorizar sem fator nenhum.
pub struct DisconnectedSpeech;

#[async_trait]
impl SpeechProvider for DisconnectedSpeech {
    async fn capture(
        &self,
        _transaction_id: Uuid,
        _expected_phrase: &str,
    ) -> Result<VoiceCapture, ProviderError> {
        Err(ProviderError::tagged(
            FailureReason::AllProvidersFailed,
            "nenhum provedor de fala configurado",
        ))
    }
}

/// Plataforma sem biometria: devolve Unsupported e deixa a política do
/// gate decidir (passa por padrão; configurável).
pub struct NoBiometricPlatform;

#[async_trait]
impl BiometricProvider for NoBiometricPlatform {
    async fn assert_identity(
        &self,
        _transaction_id: Uuid,
        _challenge: &[u8],
    ) -> Result<BiometricAssertion, ProviderError> {
        Ok(BiometricAssertion::Unsupported)
    }
}

/// Diretório local com os grandes bancos; cobre o caso comum sem depender
/// do serviço de enriquecimento.
pub struct StaticPayeeDirectory;

#[async_trait]
impl PayeeDirectory for StaticPayeeDirectory {
    async fn lookup(&self, payee_ref: &str) -> Result<PayeeInfo, ProviderError> {
        let name = match payee_ref {
            "001" => "Banco do Brasil",
            "033" => "Banco Santander",
            "104" => "Caixa Econômica Federal",
            "237" => "Banco Bradesco",
            "341" => "Banco Itaú",
            _ => {
                return Err(ProviderError::opaque(format!(
                    "banco {payee_ref} fora do diretório local"
                )));
            }
        };

        Ok(PayeeInfo { name: name.to_string(), document: None })
    }
}

/// Rede de liquidação de sandbox: registra a ordem no log e devolve um
/// recibo sintético. Nunca usar fora de desenvolvimento.
pub struct SandboxSettlementNetwork;

#[async_trait]
impl SettlementNetwork for SandboxSettlementNetwork {
    async fn send_transfer(&self, order: &PixTransferOrder) -> Result<PixReceipt, ProviderError> {
        tracing::info!(
            transaction_id = %order.transaction_id,
            amount = %order.amount,
            "Transferência PIX enviada para a rede de sandbox"
        );
        Ok(PixReceipt {
            end_to_end_id: format!("E{}", order.transaction_id.simple()),
            status: "SETTLED".to_string(),
        })
    }
}
