// src/db/confirmation_repo.rs

use async_trait::async_trait;
use sqlx::PgPool;

use crate::{
    common::error::AppError,
    db::scoped::ScopedSession,
    middleware::tenancy::TenantContext,
    models::confirmation::ConfirmationAttempt,
    services::confirmation_service::AttemptStore,
};

/// Persistência Postgres das tentativas de confirmação. Cada escrita abre
/// a própria sessão escopada: o vínculo de tenant precede o INSERT/UPDATE.
#[derive(Clone)]
pub struct ConfirmationRepository {
    pool: PgPool,
}

impl ConfirmationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for ConfirmationRepository {
    async fn create(
        &self,
        ctx: &TenantContext,
        attempt: &ConfirmationAttempt,
    ) -> Result<(), AppError> {
        let mut session = ScopedSession::bind(&self.pool, ctx).await?;

        sqlx::query(
            r#"
            INSERT INTO confirmation_attempts (
                id, transaction_id, tenant_id, amount,
                required_factors, factor_outcomes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.transaction_id)
        .bind(attempt.tenant_id)
        .bind(attempt.amount)
        .bind(attempt.required_factors)
        .bind(serde_json::to_value(&attempt.factor_outcomes).unwrap_or_default())
        .bind(attempt.created_at)
        .execute(session.conn())
        .await?;

        Ok(())
    }

    async fn save(
        &self,
        ctx: &TenantContext,
        attempt: &ConfirmationAttempt,
    ) -> Result<(), AppError> {
        let mut session = ScopedSession::bind(&self.pool, ctx).await?;

        // O filtro `resolved_at IS NULL` torna a imutabilidade terminal uma
        // regra do banco: uma tentativa congelada nunca é regravada.
        let result = sqlx::query(
            r#"
            UPDATE confirmation_attempts
            SET factor_outcomes = $2,
                overall = $3,
                fallback = $4,
                resolved_at = $5
            WHERE id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(attempt.id)
        .bind(serde_json::to_value(&attempt.factor_outcomes).unwrap_or_default())
        .bind(attempt.overall)
        .bind(attempt.fallback)
        .bind(attempt.resolved_at)
        .execute(session.conn())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ConfirmationInProgress);
        }

        Ok(())
    }
}
