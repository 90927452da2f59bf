// src/middleware/tenancy.rs

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::common::error::AppError;

// O nome do nosso cabeçalho HTTP customizado
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Identidade verificada do chamador, criada por requisição e nunca
/// cacheada entre requisições. É a ÚNICA porta de entrada para uma sessão
/// escopada no banco: toda query de tenant passa por um
/// `ScopedSession::bind` alimentado por este contexto.
///
/// Os campos são privados de propósito. Uma requisição de usuário final
/// jamais constrói um contexto de service account; esse caminho só existe
/// via [`TenantContext::service_account`], chamado por código de
/// background/administrativo.
#[derive(Debug, Clone)]
pub struct TenantContext {
    tenant_id: Uuid,
    user_id: Option<Uuid>,
    service_account: bool,
}

impl TenantContext {
    /// Contexto escopado por usuário: toda query fica restrita às linhas
    /// do tenant pela política de RLS.
    pub fn user_scoped(tenant_id: Uuid, user_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id: Some(user_id),
            service_account: false,
        }
    }

    /// Contexto de service account: ignora a restrição por linha.
    /// Uso exclusivo de rotinas de background; cada bind emite a sua
    /// própria entrada de auditoria, distinguível da atividade de usuário.
    pub fn service_account() -> Self {
        Self {
            tenant_id: Uuid::nil(),
            user_id: None,
            service_account: true,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn is_service_account(&self) -> bool {
        self.service_account
    }
}

// Extrator: o `tenant_guard` já validou o cabeçalho e a associação do
// usuário ao tenant, e deixou o contexto nos extensions da requisição.
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .ok_or(AppError::InvalidToken)
    }
}
