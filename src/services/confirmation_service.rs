// src/services/confirmation_service.rs
//
// Máquina de estados de confirmação de transações de alto valor:
// frase falada (transcrição + similaridade) e, acima do segundo limiar,
// asserção biométrica da plataforma. Falhas são classificadas e dirigem
// uma estratégia de fallback fixa por cenário.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    middleware::tenancy::TenantContext,
    models::{
        audit::NewAuditEntry,
        confirmation::{
            ConfirmationAction, ConfirmationAttempt, ConfirmationOutcome, FactorKind,
            FactorOutcome, FailureReason, FallbackStrategy, GateDecision, RequiredFactors,
        },
    },
    services::audit_service::AuditService,
};

// ---
// Colaboradores externos (provedores), atrás de traits
// ---

/// Erro de um provedor externo. O `kind` é a classificação explícita
/// atribuída no ponto em que o erro nasce; provedores opacos deixam `None`
/// e caem no casamento por substring da mensagem.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: Option<FailureReason>,
    pub message: String,
}

impl ProviderError {
    pub fn tagged(kind: FailureReason, message: impl Into<String>) -> Self {
        Self { kind: Some(kind), message: message.into() }
    }

    pub fn opaque(message: impl Into<String>) -> Self {
        Self { kind: None, message: message.into() }
    }
}

/// Transcrição capturada pelo provedor de fala.
#[derive(Debug, Clone)]
pub struct VoiceCapture {
    pub transcript: String,
    pub confidence: f64,
}

/// Resposta da plataforma de biometria.
#[derive(Debug, Clone)]
pub enum BiometricAssertion {
    /// Credencial devolvida pela plataforma: sucesso.
    Credential(Vec<u8>),
    /// Dispositivo sem capacidade biométrica.
    Unsupported,
}

/// Provedor de transcrição de fala: captura o áudio do usuário para a frase
/// esperada e devolve transcrição + confiança. Pode falhar ou demorar; o
/// gate impõe o próprio timeout por fora.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn capture(
        &self,
        transaction_id: Uuid,
        expected_phrase: &str,
    ) -> Result<VoiceCapture, ProviderError>;
}

/// Asserção biométrica da plataforma (delegada ao dispositivo).
#[async_trait]
pub trait BiometricProvider: Send + Sync {
    async fn assert_identity(
        &self,
        transaction_id: Uuid,
        challenge: &[u8],
    ) -> Result<BiometricAssertion, ProviderError>;
}

/// Persistência das tentativas de confirmação. O impl Postgres grava sob a
/// sessão escopada do tenant; os testes usam um fake em memória.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn create(&self, ctx: &TenantContext, attempt: &ConfirmationAttempt)
        -> Result<(), AppError>;
    /// Atualiza uma tentativa ainda não-terminal (anexa fatores / finaliza).
    async fn save(&self, ctx: &TenantContext, attempt: &ConfirmationAttempt)
        -> Result<(), AppError>;
}

// ---
// Configuração do gate
// ---

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Abaixo deste valor a confirmação não é exigida (atalho auditado).
    pub min_confirmation_amount: Decimal,
    /// Acima deste valor a política exige voz + biometria.
    pub biometric_amount: Decimal,
    /// Orçamento de tempo do fator de voz, imposto pelo próprio gate.
    pub voice_timeout: Duration,
    pub similarity_threshold: f64,
    pub confidence_threshold: f64,
    /// Dispositivo sem biometria conta como sucesso (trade-off documentado
    /// de disponibilidade; configurável porque enfraquece a garantia).
    pub biometric_unsupported_passes: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confirmation_amount: dec!(200.00),
            biometric_amount: dec!(1000.00),
            voice_timeout: Duration::from_secs(30),
            similarity_threshold: 0.75,
            confidence_threshold: 0.7,
            biometric_unsupported_passes: true,
        }
    }
}

impl GateConfig {
    /// Carrega a configuração do ambiente, mantendo os padrões quando a
    /// variável não está definida.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("MIN_CONFIRMATION_AMOUNT") {
            if let Ok(amount) = v.parse() {
                config.min_confirmation_amount = amount;
            }
        }
        if let Ok(v) = std::env::var("BIOMETRIC_CONFIRMATION_AMOUNT") {
            if let Ok(amount) = v.parse() {
                config.biometric_amount = amount;
            }
        }
        if let Ok(v) = std::env::var("VOICE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.voice_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("BIOMETRIC_UNSUPPORTED_PASSES") {
            config.biometric_unsupported_passes = v != "false" && v != "0";
        }

        config
    }

    pub fn required_factors(&self, amount: Decimal) -> RequiredFactors {
        if amount < self.min_confirmation_amount {
            RequiredFactors::None
        } else if amount >= self.biometric_amount {
            RequiredFactors::VoiceAndBiometric
        } else {
            RequiredFactors::VoiceOnly
        }
    }
}

// ---
// Frases de confirmação por ação
// ---

const TRANSFER_PHRASES: &[&str] = &[
    "Eu autorizo esta transferência",
    "Confirmo a transferência",
    "Sim, eu autorizo",
];

const BOLETO_PHRASES: &[&str] = &[
    "Eu autorizo este pagamento",
    "Confirmo o pagamento",
    "Sim, eu autorizo o pagamento",
];

pub fn phrases_for(action: ConfirmationAction) -> &'static [&'static str] {
    match action {
        ConfirmationAction::Transfer => TRANSFER_PHRASES,
        ConfirmationAction::BoletoPayment => BOLETO_PHRASES,
    }
}

// ---
// Normalização e similaridade da frase falada
// ---

/// Remove pontuação, colapsa espaços e rebaixa caixa antes da comparação.
pub fn normalize_phrase(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn phrase_similarity(expected: &str, transcript: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_phrase(expected), &normalize_phrase(transcript))
}

// ---
// Classificação de falhas e política de fallback
// ---

/// Classifica uma falha de provedor. A tag explícita ganha; mensagens
/// opacas caem no casamento por substring, com LOW_CONFIDENCE como padrão.
pub fn classify_failure(err: &ProviderError) -> FailureReason {
    if let Some(kind) = err.kind {
        return kind;
    }

    let msg = err.message.to_lowercase();
    if msg.contains("all providers") || msg.contains("todos os provedores") {
        FailureReason::AllProvidersFailed
    } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("tempo esgotado")
    {
        FailureReason::Timeout
    } else if msg.contains("network")
        || msg.contains("connection")
        || msg.contains("conexão")
        || msg.contains("rede")
    {
        FailureReason::NetworkError
    } else if msg.contains("audio") || msg.contains("áudio") || msg.contains("ruído") {
        FailureReason::AudioQuality
    } else {
        FailureReason::LowConfidence
    }
}

/// Plano de fallback fixo para uma falha classificada.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPlan {
    pub strategy: FallbackStrategy,
    pub max_retries: u32,
    pub guidance: &'static str,
}

pub fn fallback_for(reason: FailureReason) -> FallbackPlan {
    match reason {
        FailureReason::LowConfidence => FallbackPlan {
            strategy: FallbackStrategy::Retry,
            max_retries: 1,
            guidance: "Não entendi bem. Fale mais claramente e repita a frase de confirmação.",
        },
        FailureReason::AudioQuality => FallbackPlan {
            strategy: FallbackStrategy::Retry,
            max_retries: 1,
            guidance: "O áudio ficou com ruído. Procure um ambiente mais silencioso e tente de novo.",
        },
        FailureReason::NetworkError => FallbackPlan {
            strategy: FallbackStrategy::Retry,
            max_retries: 2,
            guidance: "Verifique a sua conexão com a internet e tente novamente.",
        },
        FailureReason::AllProvidersFailed => FallbackPlan {
            strategy: FallbackStrategy::PinFallback,
            max_retries: 0,
            guidance: "A confirmação por voz está indisponível. Use o seu PIN para autorizar.",
        },
        FailureReason::Timeout => FallbackPlan {
            strategy: FallbackStrategy::Cancel,
            max_retries: 0,
            guidance: "O tempo de confirmação esgotou e a operação foi cancelada.",
        },
    }
}

// ---
// O serviço (máquina de estados)
// ---

/// Pedido de confirmação vindo do chamador.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub transaction_id: Uuid,
    pub action: ConfirmationAction,
    pub amount: Decimal,
}

/// Construído uma vez na raiz de composição e injetado nos handlers;
/// nenhum estado global escondido.
#[derive(Clone)]
pub struct ConfirmationService {
    config: GateConfig,
    speech: Arc<dyn SpeechProvider>,
    biometric: Arc<dyn BiometricProvider>,
    store: Arc<dyn AttemptStore>,
    audit: AuditService,
    // Transações com confirmação em andamento: a segunda tentativa
    // concorrente para o mesmo id é rejeitada, nunca mesclada.
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

/// Remove a transação do conjunto em andamento mesmo em caminhos de erro.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    transaction_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.transaction_id);
        }
    }
}

impl ConfirmationService {
    pub fn new(
        config: GateConfig,
        speech: Arc<dyn SpeechProvider>,
        biometric: Arc<dyn BiometricProvider>,
        store: Arc<dyn AttemptStore>,
        audit: AuditService,
    ) -> Self {
        Self {
            config,
            speech,
            biometric,
            store,
            audit,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Roda o gate de confirmação até um desfecho terminal.
    ///
    /// Todo desfecho (Authorized, PinRequired ou Cancelled) produz exatamente
    /// um registro de tentativa e uma entrada de auditoria; retries
    /// intermediários anexam fatores à mesma tentativa não-terminal.
    pub async fn confirm(
        &self,
        ctx: &TenantContext,
        request: ConfirmationRequest,
    ) -> Result<GateDecision, AppError> {
        let _guard = self.acquire_slot(request.transaction_id)?;

        let required = self.config.required_factors(request.amount);
        let mut attempt = ConfirmationAttempt::new(
            request.transaction_id,
            ctx.tenant_id(),
            request.amount,
            required,
        );
        self.store.create(ctx, &attempt).await?;

        // Valor abaixo do limiar: autoriza direto, sem invocar nenhum fator.
        // O atalho é legítimo mas não escapa da auditoria.
        if required == RequiredFactors::None {
            return self
                .finalize(ctx, &mut attempt, ConfirmationOutcome::Authorized, 1.0, None, None)
                .await;
        }

        // --- Fator de voz ---
        let voice = match self.run_voice_factor(ctx, &request, &mut attempt).await? {
            Ok(capture) => capture,
            Err((reason, plan)) => {
                let outcome = match plan.strategy {
                    FallbackStrategy::PinFallback | FallbackStrategy::Retry => {
                        ConfirmationOutcome::PinRequired
                    }
                    FallbackStrategy::Cancel => ConfirmationOutcome::Cancelled,
                };
                tracing::warn!(
                    transaction_id = %request.transaction_id,
                    ?reason,
                    "Confirmação por voz falhou; fallback selecionado"
                );
                return self
                    .finalize(ctx, &mut attempt, outcome, 0.0, Some(plan), Some(reason))
                    .await;
            }
        };

        // --- Fator biométrico (somente após a voz passar) ---
        if required == RequiredFactors::VoiceAndBiometric {
            if let Some(reason) = self.run_biometric_factor(&request, &mut attempt, ctx).await? {
                // A mesma tabela de política vale aqui: timeout cancela,
                // o resto cai para o PIN.
                let plan = fallback_for(reason);
                let outcome = match plan.strategy {
                    FallbackStrategy::Cancel => ConfirmationOutcome::Cancelled,
                    _ => ConfirmationOutcome::PinRequired,
                };
                return self
                    .finalize(ctx, &mut attempt, outcome, voice.confidence, Some(plan), Some(reason))
                    .await;
            }
        }

        self.finalize(
            ctx,
            &mut attempt,
            ConfirmationOutcome::Authorized,
            voice.confidence,
            None,
            None,
        )
        .await
    }

    fn acquire_slot(&self, transaction_id: Uuid) -> Result<InFlightGuard, AppError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| anyhow::anyhow!("lock de confirmações envenenado"))?;
        if !set.insert(transaction_id) {
            return Err(AppError::ConfirmationInProgress);
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            transaction_id,
        })
    }

    /// Executa o fator de voz com o loop de retry por classificação.
    /// `Ok(Ok)` é sucesso; `Ok(Err)` é falha terminal com o plano escolhido.
    async fn run_voice_factor(
        &self,
        ctx: &TenantContext,
        request: &ConfirmationRequest,
        attempt: &mut ConfirmationAttempt,
    ) -> Result<Result<VoiceCapture, (FailureReason, FallbackPlan)>, AppError> {
        let mut retries_used: HashMap<FailureReason, u32> = HashMap::new();

        loop {
            let expected = self.pick_phrase(request.action);

            // Timeout próprio do gate, independente do timeout do provedor.
            let result = tokio::time::timeout(
                self.config.voice_timeout,
                self.speech.capture(request.transaction_id, expected),
            )
            .await;

            let failure = match result {
                Err(_elapsed) => {
                    self.append_voice_failure(ctx, attempt, FailureReason::Timeout).await?;
                    FailureReason::Timeout
                }
                Ok(Err(provider_err)) => {
                    let reason = classify_failure(&provider_err);
                    self.append_voice_failure(ctx, attempt, reason).await?;
                    reason
                }
                Ok(Ok(capture)) => {
                    let similarity = phrase_similarity(expected, &capture.transcript);
                    let passed = similarity > self.config.similarity_threshold
                        && capture.confidence > self.config.confidence_threshold;

                    self.append_factor(
                        ctx,
                        attempt,
                        FactorOutcome {
                            factor: FactorKind::Voice,
                            success: passed,
                            confidence: capture.confidence,
                            transcript: Some(capture.transcript.clone()),
                            failure_reason: (!passed).then_some(FailureReason::LowConfidence),
                            resolved_at: Utc::now(),
                        },
                    )
                    .await?;

                    if passed {
                        return Ok(Ok(capture));
                    }
                    FailureReason::LowConfidence
                }
            };

            let plan = fallback_for(failure);
            let used = retries_used.entry(failure).or_insert(0);
            if plan.strategy == FallbackStrategy::Retry && *used < plan.max_retries {
                *used += 1;
                tracing::info!(
                    transaction_id = %request.transaction_id,
                    ?failure,
                    retry = *used,
                    "Repetindo fator de voz com prompt corretivo: {}",
                    plan.guidance
                );
                continue;
            }

            return Ok(Err((failure, plan)));
        }
    }

    /// Executa a asserção biométrica; devolve `None` em sucesso e a razão
    /// classificada da falha caso contrário.
    async fn run_biometric_factor(
        &self,
        request: &ConfirmationRequest,
        attempt: &mut ConfirmationAttempt,
        ctx: &TenantContext,
    ) -> Result<Option<FailureReason>, AppError> {
        let challenge = request.transaction_id.as_bytes();

        let result = tokio::time::timeout(
            self.config.voice_timeout,
            self.biometric.assert_identity(request.transaction_id, challenge),
        )
        .await;

        let reason = match result {
            Err(_elapsed) => Some(FailureReason::Timeout),
            Ok(Err(provider_err)) => Some(classify_failure(&provider_err)),
            Ok(Ok(BiometricAssertion::Credential(_))) => None,
            // Sem hardware biométrico: passa em vez de bloquear a transação,
            // a menos que a operação desligue esse comportamento.
            Ok(Ok(BiometricAssertion::Unsupported)) => {
                if self.config.biometric_unsupported_passes {
                    None
                } else {
                    Some(FailureReason::AllProvidersFailed)
                }
            }
        };

        let success = reason.is_none();
        self.append_factor(
            ctx,
            attempt,
            FactorOutcome {
                factor: FactorKind::Biometric,
                success,
                confidence: if success { 1.0 } else { 0.0 },
                transcript: None,
                failure_reason: reason,
                resolved_at: Utc::now(),
            },
        )
        .await?;

        Ok(reason)
    }

    fn pick_phrase(&self, action: ConfirmationAction) -> &'static str {
        let phrases = phrases_for(action);
        phrases
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(phrases[0])
    }

    async fn append_factor(
        &self,
        ctx: &TenantContext,
        attempt: &mut ConfirmationAttempt,
        outcome: FactorOutcome,
    ) -> Result<(), AppError> {
        attempt.factor_outcomes.push(outcome);
        self.store.save(ctx, attempt).await
    }

    async fn append_voice_failure(
        &self,
        ctx: &TenantContext,
        attempt: &mut ConfirmationAttempt,
        reason: FailureReason,
    ) -> Result<(), AppError> {
        self.append_factor(
            ctx,
            attempt,
            FactorOutcome {
                factor: FactorKind::Voice,
                success: false,
                confidence: 0.0,
                transcript: None,
                failure_reason: Some(reason),
                resolved_at: Utc::now(),
            },
        )
        .await
    }

    /// Congela a tentativa com o desfecho terminal, grava a entrada única
    /// de auditoria e monta a decisão devolvida ao chamador.
    async fn finalize(
        &self,
        ctx: &TenantContext,
        attempt: &mut ConfirmationAttempt,
        outcome: ConfirmationOutcome,
        confidence: f64,
        plan: Option<FallbackPlan>,
        reason: Option<FailureReason>,
    ) -> Result<GateDecision, AppError> {
        attempt.overall = Some(outcome);
        attempt.fallback = plan.as_ref().map(|p| p.strategy);
        attempt.resolved_at = Some(Utc::now());
        self.store.save(ctx, attempt).await?;

        // A auditoria acompanha a decisão na mesma operação lógica,
        // nunca em lote ou diferida.
        self.audit
            .record(
                ctx,
                NewAuditEntry {
                    tenant_id: ctx.tenant_id(),
                    user_id: ctx.user_id(),
                    action: "confirmation.resolved".to_string(),
                    resource_type: "confirmation_attempt".to_string(),
                    resource_id: Some(attempt.id),
                    before: None,
                    after: Some(json!({
                        "transactionId": attempt.transaction_id,
                        "outcome": outcome,
                        "requiredFactors": attempt.required_factors,
                        "factorCount": attempt.factor_outcomes.len(),
                        "failureReason": reason,
                    })),
                    success: outcome == ConfirmationOutcome::Authorized,
                    error_message: plan.as_ref().map(|p| p.guidance.to_string()),
                },
            )
            .await;

        Ok(GateDecision {
            outcome,
            confidence,
            fallback: plan.as_ref().map(|p| p.strategy),
            guidance: plan.map(|p| p.guidance.to_string()),
            attempt_id: attempt.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // --- Fakes ---

    struct ScriptedSpeech {
        calls: AtomicUsize,
        script: Mutex<Vec<Result<VoiceCapture, ProviderError>>>,
    }

    impl ScriptedSpeech {
        fn new(script: Vec<Result<VoiceCapture, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechProvider for ScriptedSpeech {
        async fn capture(
            &self,
            _transaction_id: Uuid,
            _expected_phrase: &str,
        ) -> Result<VoiceCapture, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(ProviderError::opaque("roteiro esgotado"));
            }
            script.remove(0)
        }
    }

    struct FakeBiometric {
        calls: AtomicUsize,
        response: fn() -> Result<BiometricAssertion, ProviderError>,
    }

    impl FakeBiometric {
        fn new(response: fn() -> Result<BiometricAssertion, ProviderError>) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), response })
        }
    }

    #[async_trait]
    impl BiometricProvider for FakeBiometric {
        async fn assert_identity(
            &self,
            _transaction_id: Uuid,
            _challenge: &[u8],
        ) -> Result<BiometricAssertion, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response)()
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        attempts: Mutex<HashMap<Uuid, ConfirmationAttempt>>,
    }

    #[async_trait]
    impl AttemptStore for MemoryStore {
        async fn create(
            &self,
            _ctx: &TenantContext,
            attempt: &ConfirmationAttempt,
        ) -> Result<(), AppError> {
            self.attempts
                .lock()
                .unwrap()
                .insert(attempt.id, attempt.clone());
            Ok(())
        }

        async fn save(
            &self,
            _ctx: &TenantContext,
            attempt: &ConfirmationAttempt,
        ) -> Result<(), AppError> {
            let mut attempts = self.attempts.lock().unwrap();
            let stored = attempts.get(&attempt.id).unwrap();
            // Imutabilidade: uma tentativa terminal nunca é regravada.
            assert!(!stored.is_terminal(), "tentativa terminal foi mutada");
            attempts.insert(attempt.id, attempt.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        entries: Mutex<Vec<NewAuditEntry>>,
    }

    #[async_trait]
    impl crate::services::audit_service::AuditSink for MemorySink {
        async fn append(
            &self,
            _ctx: &TenantContext,
            entry: NewAuditEntry,
        ) -> Result<(), AppError> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn ctx() -> TenantContext {
        TenantContext::user_scoped(Uuid::new_v4(), Uuid::new_v4())
    }

    fn service_with(
        speech: Arc<ScriptedSpeech>,
        biometric: Arc<FakeBiometric>,
    ) -> (ConfirmationService, Arc<MemoryStore>, Arc<MemorySink>) {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let service = ConfirmationService::new(
            GateConfig::default(),
            speech,
            biometric,
            store.clone(),
            AuditService::new(sink.clone()),
        );
        (service, store, sink)
    }

    fn request(amount: Decimal) -> ConfirmationRequest {
        ConfirmationRequest {
            transaction_id: Uuid::new_v4(),
            action: ConfirmationAction::Transfer,
            amount,
        }
    }

    // --- Normalização e classificação ---

    #[test]
    fn normalizacao_remove_pontuacao_e_colapsa_espacos() {
        assert_eq!(
            normalize_phrase("  Eu AUTORIZO,   esta transferência!  "),
            "eu autorizo esta transferência"
        );
    }

    #[test]
    fn similaridade_tolera_pequenas_diferencas() {
        let sim = phrase_similarity("Eu autorizo esta transferência", "eu autorizo esta transferencia");
        assert!(sim > 0.9);

        let sim = phrase_similarity("Eu autorizo esta transferência", "bom dia");
        assert!(sim < 0.5);
    }

    #[test]
    fn tag_explicita_vence_o_casamento_por_texto() {
        let err = ProviderError::tagged(FailureReason::NetworkError, "algo com áudio");
        assert_eq!(classify_failure(&err), FailureReason::NetworkError);
    }

    #[test]
    fn classificacao_por_substring_de_erros_opacos() {
        let cases = [
            ("all providers exhausted", FailureReason::AllProvidersFailed),
            ("request timed out", FailureReason::Timeout),
            ("network unreachable", FailureReason::NetworkError),
            ("falha na conexão com o servidor", FailureReason::NetworkError),
            ("audio stream corrupted", FailureReason::AudioQuality),
            ("mensagem completamente desconhecida", FailureReason::LowConfidence),
        ];
        for (msg, expected) in cases {
            assert_eq!(classify_failure(&ProviderError::opaque(msg)), expected, "{msg}");
        }
    }

    #[test]
    fn politica_de_fallback_por_cenario() {
        assert_eq!(fallback_for(FailureReason::LowConfidence).max_retries, 1);
        assert_eq!(fallback_for(FailureReason::AudioQuality).max_retries, 1);
        assert_eq!(fallback_for(FailureReason::NetworkError).max_retries, 2);
        assert_eq!(
            fallback_for(FailureReason::AllProvidersFailed).strategy,
            FallbackStrategy::PinFallback
        );
        assert_eq!(fallback_for(FailureReason::Timeout).strategy, FallbackStrategy::Cancel);
    }

    // --- Máquina de estados ---

    #[tokio::test]
    async fn abaixo_do_limiar_autoriza_sem_invocar_fatores() {
        let speech = ScriptedSpeech::new(vec![]);
        let biometric = FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported));
        let (service, store, sink) = service_with(speech.clone(), biometric.clone());

        let decision = service.confirm(&ctx(), request(dec!(50.00))).await.unwrap();

        assert_eq!(decision.outcome, ConfirmationOutcome::Authorized);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(speech.call_count(), 0);
        assert_eq!(biometric.calls.load(Ordering::SeqCst), 0);

        // Atalho legítimo continua auditado: uma tentativa, uma entrada.
        assert_eq!(store.attempts.lock().unwrap().len(), 1);
        assert_eq!(sink.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn voz_correta_autoriza_acima_do_limiar() {
        // A frase esperada é sorteada; o fake ecoa a própria frase sorteada
        // com confiança alta, então a similaridade é sempre 1.0.
        struct EchoSpeech(AtomicUsize);
        #[async_trait]
        impl SpeechProvider for EchoSpeech {
            async fn capture(
                &self,
                _id: Uuid,
                expected: &str,
            ) -> Result<VoiceCapture, ProviderError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(VoiceCapture { transcript: expected.to_string(), confidence: 0.92 })
            }
        }
        let echo = Arc::new(EchoSpeech(AtomicUsize::new(0)));
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let service = ConfirmationService::new(
            GateConfig::default(),
            echo.clone(),
            FakeBiometric::new(|| Ok(BiometricAssertion::Credential(vec![1]))),
            store.clone(),
            AuditService::new(sink.clone()),
        );

        let decision = service.confirm(&ctx(), request(dec!(500.00))).await.unwrap();

        assert_eq!(decision.outcome, ConfirmationOutcome::Authorized);
        assert_eq!(echo.0.load(Ordering::SeqCst), 1);
        assert_eq!(sink.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_providers_failed_vai_direto_para_pin_sem_retry() {
        let speech = ScriptedSpeech::new(vec![Err(ProviderError::tagged(
            FailureReason::AllProvidersFailed,
            "todos os provedores de fala falharam",
        ))]);
        let biometric = FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported));
        let (service, _store, sink) = service_with(speech.clone(), biometric);

        let decision = service.confirm(&ctx(), request(dec!(500.00))).await.unwrap();

        assert_eq!(decision.outcome, ConfirmationOutcome::PinRequired);
        assert_eq!(decision.fallback, Some(FallbackStrategy::PinFallback));
        // Nenhum retry: o provedor foi chamado exatamente uma vez.
        assert_eq!(speech.call_count(), 1);
        assert_eq!(sink.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn baixa_confianca_ganha_um_unico_retry() {
        let speech = ScriptedSpeech::new(vec![
            Ok(VoiceCapture { transcript: "hmm não sei".to_string(), confidence: 0.3 }),
            Ok(VoiceCapture { transcript: "também não".to_string(), confidence: 0.2 }),
        ]);
        let biometric = FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported));
        let (service, store, _sink) = service_with(speech.clone(), biometric);

        let decision = service.confirm(&ctx(), request(dec!(500.00))).await.unwrap();

        // Original + 1 retry, depois terminal (PIN após esgotar retries).
        assert_eq!(speech.call_count(), 2);
        assert_eq!(decision.outcome, ConfirmationOutcome::PinRequired);

        // Os dois fatores ficaram anexados à MESMA tentativa.
        let attempts = store.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        let attempt = attempts.values().next().unwrap();
        assert_eq!(attempt.factor_outcomes.len(), 2);
        assert!(attempt.is_terminal());
    }

    #[tokio::test]
    async fn erro_de_rede_tenta_ate_duas_vezes() {
        let speech = ScriptedSpeech::new(vec![
            Err(ProviderError::tagged(FailureReason::NetworkError, "sem rede")),
            Err(ProviderError::tagged(FailureReason::NetworkError, "sem rede")),
            Err(ProviderError::tagged(FailureReason::NetworkError, "sem rede")),
        ]);
        let biometric = FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported));
        let (service, _store, _sink) = service_with(speech.clone(), biometric);

        let decision = service.confirm(&ctx(), request(dec!(500.00))).await.unwrap();

        // 1 original + 2 retries = 3 chamadas, depois PIN.
        assert_eq!(speech.call_count(), 3);
        assert_eq!(decision.outcome, ConfirmationOutcome::PinRequired);
    }

    #[tokio::test]
    async fn timeout_cancela_sem_retry() {
        struct SlowSpeech;
        #[async_trait]
        impl SpeechProvider for SlowSpeech {
            async fn capture(
                &self,
                _id: Uuid,
                _expected: &str,
            ) -> Result<VoiceCapture, ProviderError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        let mut config = GateConfig::default();
        config.voice_timeout = Duration::from_millis(20);

        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let service = ConfirmationService::new(
            config,
            Arc::new(SlowSpeech),
            FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported)),
            store.clone(),
            AuditService::new(sink.clone()),
        );

        let decision = service.confirm(&ctx(), request(dec!(500.00))).await.unwrap();

        // Timeout resolve a tentativa para um estado terminal, nunca aberta.
        assert_eq!(decision.outcome, ConfirmationOutcome::Cancelled);
        assert_eq!(decision.fallback, Some(FallbackStrategy::Cancel));
        let attempts = store.attempts.lock().unwrap();
        assert!(attempts.values().next().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn biometria_sem_suporte_passa_por_padrao_mas_e_configuravel() {
        struct EchoSpeech;
        #[async_trait]
        impl SpeechProvider for EchoSpeech {
            async fn capture(
                &self,
                _id: Uuid,
                expected: &str,
            ) -> Result<VoiceCapture, ProviderError> {
                Ok(VoiceCapture { transcript: expected.to_string(), confidence: 0.9 })
            }
        }

        // Padrão: Unsupported conta como sucesso.
        let (service, _store, _sink) = {
            let store = Arc::new(MemoryStore::default());
            let sink = Arc::new(MemorySink::default());
            (
                ConfirmationService::new(
                    GateConfig::default(),
                    Arc::new(EchoSpeech),
                    FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported)),
                    store.clone(),
                    AuditService::new(sink.clone()),
                ),
                store,
                sink,
            )
        };
        let decision = service.confirm(&ctx(), request(dec!(5000.00))).await.unwrap();
        assert_eq!(decision.outcome, ConfirmationOutcome::Authorized);

        // Desligado: Unsupported vira falha e cai para PIN.
        let mut strict = GateConfig::default();
        strict.biometric_unsupported_passes = false;
        let service = ConfirmationService::new(
            strict,
            Arc::new(EchoSpeech),
            FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported)),
            Arc::new(MemoryStore::default()),
            AuditService::new(Arc::new(MemorySink::default())),
        );
        let decision = service.confirm(&ctx(), request(dec!(5000.00))).await.unwrap();
        assert_eq!(decision.outcome, ConfirmationOutcome::PinRequired);
    }

    #[tokio::test]
    async fn timeout_da_biometria_cancela_em_vez_de_pedir_pin() {
        struct EchoSpeech;
        #[async_trait]
        impl SpeechProvider for EchoSpeech {
            async fn capture(
                &self,
                _id: Uuid,
                expected: &str,
            ) -> Result<VoiceCapture, ProviderError> {
                Ok(VoiceCapture { transcript: expected.to_string(), confidence: 0.9 })
            }
        }

        struct SlowBiometric;
        #[async_trait]
        impl BiometricProvider for SlowBiometric {
            async fn assert_identity(
                &self,
                _id: Uuid,
                _challenge: &[u8],
            ) -> Result<BiometricAssertion, ProviderError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        let mut config = GateConfig::default();
        config.voice_timeout = Duration::from_millis(50);

        let store = Arc::new(MemoryStore::default());
        let service = ConfirmationService::new(
            config,
            Arc::new(EchoSpeech),
            Arc::new(SlowBiometric),
            store.clone(),
            AuditService::new(Arc::new(MemorySink::default())),
        );

        let decision = service.confirm(&ctx(), request(dec!(5000.00))).await.unwrap();

        // A política de TIMEOUT vale para os dois fatores: cancela.
        assert_eq!(decision.outcome, ConfirmationOutcome::Cancelled);
        assert_eq!(decision.fallback, Some(FallbackStrategy::Cancel));
    }

    #[tokio::test]
    async fn falha_da_biometria_carrega_a_propria_classificacao() {
        struct EchoSpeech;
        #[async_trait]
        impl SpeechProvider for EchoSpeech {
            async fn capture(
                &self,
                _id: Uuid,
                expected: &str,
            ) -> Result<VoiceCapture, ProviderError> {
                Ok(VoiceCapture { transcript: expected.to_string(), confidence: 0.9 })
            }
        }

        let biometric = FakeBiometric::new(|| {
            Err(ProviderError::tagged(FailureReason::NetworkError, "sem rede"))
        });
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(MemorySink::default());
        let service = ConfirmationService::new(
            GateConfig::default(),
            Arc::new(EchoSpeech),
            biometric,
            store.clone(),
            AuditService::new(sink.clone()),
        );

        let decision = service.confirm(&ctx(), request(dec!(5000.00))).await.unwrap();
        assert_eq!(decision.outcome, ConfirmationOutcome::PinRequired);

        // O fator e a auditoria registram a razão real, não um rótulo fixo.
        let attempts = store.attempts.lock().unwrap();
        let attempt = attempts.values().next().unwrap();
        let bio = attempt
            .factor_outcomes
            .iter()
            .find(|f| f.factor == FactorKind::Biometric)
            .unwrap();
        assert_eq!(bio.failure_reason, Some(FailureReason::NetworkError));

        let entries = sink.entries.lock().unwrap();
        assert_eq!(
            entries[0].after.as_ref().unwrap()["failureReason"],
            serde_json::json!("NETWORK_ERROR")
        );
    }

    #[tokio::test]
    async fn segunda_confirmacao_concorrente_para_a_mesma_transacao_e_rejeitada() {
        struct BlockingSpeech(tokio::sync::Notify);
        #[async_trait]
        impl SpeechProvider for BlockingSpeech {
            async fn capture(
                &self,
                _id: Uuid,
                expected: &str,
            ) -> Result<VoiceCapture, ProviderError> {
                self.0.notified().await;
                Ok(VoiceCapture { transcript: expected.to_string(), confidence: 0.9 })
            }
        }

        let speech = Arc::new(BlockingSpeech(tokio::sync::Notify::new()));
        let store = Arc::new(MemoryStore::default());
        let service = ConfirmationService::new(
            GateConfig::default(),
            speech.clone(),
            FakeBiometric::new(|| Ok(BiometricAssertion::Unsupported)),
            store,
            AuditService::new(Arc::new(MemorySink::default())),
        );

        let req = request(dec!(500.00));
        let first = {
            let service = service.clone();
            let ctx = ctx();
            let req = req.clone();
            tokio::spawn(async move { service.confirm(&ctx, req).await })
        };

        // Dá tempo da primeira registrar a transação como em andamento.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = service.confirm(&ctx(), req.clone()).await;
        assert!(matches!(second, Err(AppError::ConfirmationInProgress)));

        // Libera a primeira e confere que ela conclui normalmente.
        speech.0.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.outcome, ConfirmationOutcome::Authorized);

        // Com a primeira concluída, o slot foi liberado.
        speech.0.notify_one();
        let third = service.confirm(&ctx(), req).await.unwrap();
        assert_eq!(third.outcome, ConfirmationOutcome::Authorized);
    }
}
