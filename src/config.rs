// src/config.rs

use std::{env, sync::Arc};

use sqlx::PgPool;

use crate::{
    db::{AuditRepository, BoletoRepository, ConfirmationRepository, UserRepository, scoped},
    services::{
        audit_service::AuditService,
        auth::AuthService,
        boleto_service::BoletoService,
        confirmation_service::{ConfirmationService, GateConfig},
        pix_service::PixService,
        providers::{
            DisconnectedSpeech, NoBiometricPlatform, SandboxSettlementNetwork,
            StaticPayeeDirectory,
        },
    },
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub user_repo: UserRepository,
    pub auth_service: AuthService,
    pub audit_service: AuditService,
    pub boleto_service: BoletoService,
    pub pix_service: PixService,
}

impl AppState {
    // A assinatura retorna um Result: se a configuração falhar, a aplicação
    // não deve iniciar.
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL deve ser definida");
        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET deve ser definido");

        // Pool com reset das variáveis de RLS a cada devolução de conexão.
        let db_pool = scoped::connect_pool(&database_url, 5).await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        // --- Monta o gráfico de dependências ---
        // Tudo construído uma vez aqui e injetado; nenhum singleton global.
        let user_repo = UserRepository::new(db_pool.clone());
        let auth_service = AuthService::new(user_repo.clone(), jwt_secret);

        let audit_service = AuditService::new(Arc::new(AuditRepository::new(db_pool.clone())));

        let gate_config = GateConfig::from_env();
        tracing::info!(
            min_confirmation_amount = %gate_config.min_confirmation_amount,
            voice_timeout_secs = gate_config.voice_timeout.as_secs(),
            "Gate de confirmação configurado"
        );

        let confirmation_service = ConfirmationService::new(
            gate_config,
            Arc::new(DisconnectedSpeech),
            Arc::new(NoBiometricPlatform),
            Arc::new(ConfirmationRepository::new(db_pool.clone())),
            audit_service.clone(),
        );

        let boleto_service = BoletoService::new(
            db_pool.clone(),
            BoletoRepository::new(),
            confirmation_service.clone(),
            audit_service.clone(),
            Arc::new(StaticPayeeDirectory),
        );

        let pix_service = PixService::new(
            Arc::new(SandboxSettlementNetwork),
            confirmation_service,
            audit_service.clone(),
        );

        Ok(Self {
            db_pool,
            user_repo,
            auth_service,
            audit_service,
            boleto_service,
            pix_service,
        })
    }
}
