// src/db/audit_repo.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::scoped::ScopedSession,
    middleware::tenancy::TenantContext,
    models::audit::NewAuditEntry,
    services::audit_service::AuditSink,
};

/// Sink Postgres da trilha de auditoria. Append-only: não existe UPDATE
/// nem DELETE neste repositório, e a tabela nega ambos por política.
#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for AuditRepository {
    async fn append(&self, ctx: &TenantContext, entry: NewAuditEntry) -> Result<(), AppError> {
        let mut session = ScopedSession::bind(&self.pool, ctx).await?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, tenant_id, user_id, action, resource_type, resource_id,
                before, after, success, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(entry.success)
        .bind(&entry.error_message)
        .execute(session.conn())
        .await
        .map_err(AppError::AuditWrite)?;

        Ok(())
    }
}
