// src/services/audit_service.rs
//
// Gravador da trilha de auditoria. O contrato é assimétrico de propósito:
// a gravação acontece de forma síncrona, na mesma operação lógica do evento
// (decisão e trilha não podem divergir num crash entre as duas), mas uma
// falha de escrita jamais aborta a operação principal do chamador — ela é
// logada em nível de erro para alarme e engolida.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::error::AppError, middleware::tenancy::TenantContext, models::audit::NewAuditEntry,
};

/// Destino append-only da trilha. O impl de produção é o
/// `AuditRepository` (Postgres, sob sessão escopada); os testes usam um
/// coletor em memória.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, ctx: &TenantContext, entry: NewAuditEntry) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Grava uma entrada. Nunca propaga erro ao chamador.
    pub async fn record(&self, ctx: &TenantContext, entry: NewAuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.sink.append(ctx, entry).await {
            // Alarme via log estruturado; a operação principal segue.
            tracing::error!(
                action = %action,
                tenant_id = %ctx.tenant_id(),
                error = %e,
                "Falha ao gravar entrada de auditoria"
            );
        }
    }
}
