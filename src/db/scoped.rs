// src/db/scoped.rs
//
// Sessão escopada por tenant: o handle tipado que carrega a identidade
// verificada para dentro do Postgres ANTES de qualquer query. As políticas
// de RLS leem `app.tenant_id` / `app.user_id` / `app.service_account`;
// este módulo é o único lugar que define essas variáveis.
//
// Nada aqui é ambiente/thread-local: quem quer uma conexão escopada
// precisa segurar um `ScopedSession`, um por operação lógica concorrente.

use std::time::Duration;

use sqlx::{
    Acquire, PgConnection, PgPool, Postgres, Transaction,
    pool::PoolConnection,
    postgres::PgPoolOptions,
};

use crate::{
    common::error::AppError,
    middleware::tenancy::TenantContext,
    models::audit::NewAuditEntry,
    services::audit_service::AuditService,
};

/// Abre a pool com as variáveis de RLS zeradas a cada devolução de
/// conexão. Sem isso, uma conexão física devolvida com `app.tenant_id`
/// ainda definido deixaria uma query crua (fora do `ScopedSession`)
/// enxergar as linhas do tenant anterior.
pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .after_release(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(
                    "SELECT set_config('app.tenant_id', '', false), \
                            set_config('app.user_id', '', false), \
                            set_config('app.service_account', 'off', false)",
                )
                .execute(&mut *conn)
                .await?;
                Ok(true)
            })
        })
        .connect(database_url)
        .await
}

pub struct ScopedSession {
    conn: PoolConnection<Postgres>,
    ctx: TenantContext,
}

impl ScopedSession {
    /// Adquire uma conexão da pool e vincula a identidade do chamador como
    /// primeira operação da sessão. Se o vínculo falhar, nenhuma query
    /// roda nessa conexão (fail closed): o erro é `TenantBinding` e a
    /// conexão volta para a pool sem ser usada.
    pub async fn bind(pool: &PgPool, ctx: &TenantContext) -> Result<Self, AppError> {
        let mut conn = pool.acquire().await.map_err(AppError::TenantBinding)?;
        apply_binding(&mut conn, ctx, false).await?;
        Ok(Self { conn, ctx: ctx.clone() })
    }

    /// Sessão de service account: ignora a restrição por linha. Alcançável
    /// somente por código de background/administrativo — o `TenantContext`
    /// de uma requisição de usuário nunca carrega o flag — e cada uso grava
    /// a sua própria entrada de auditoria antes de devolver o handle.
    pub async fn bind_service_account(
        pool: &PgPool,
        audit: &AuditService,
        reason: &str,
    ) -> Result<Self, AppError> {
        let ctx = TenantContext::service_account();
        let mut conn = pool.acquire().await.map_err(AppError::TenantBinding)?;
        apply_binding(&mut conn, &ctx, false).await?;

        tracing::warn!(reason, "Sessão de service account aberta (bypass de RLS)");
        audit
            .record(
                &ctx,
                NewAuditEntry {
                    tenant_id: ctx.tenant_id(),
                    user_id: None,
                    action: "service_account.bind".to_string(),
                    resource_type: "db_session".to_string(),
                    resource_id: None,
                    before: None,
                    after: Some(serde_json::json!({ "reason": reason })),
                    success: true,
                    error_message: None,
                },
            )
            .await;

        Ok(Self { conn, ctx })
    }

    /// Executor para queries avulsas nesta sessão.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.conn
    }

    /// Abre uma transação e RE-AFIRMA o vínculo dentro dela.
    ///
    /// `set_config(..., true)` é local à transação; um vínculo feito só no
    /// nível da sessão pode não valer dentro de contextos transacionais
    /// aninhados dependendo de como a sessão foi configurada. Repetir o
    /// vínculo aqui fecha a brecha de leitura cross-tenant dentro de
    /// transações — a classe de bug mais perigosa deste componente.
    pub async fn begin(&mut self) -> Result<ScopedTransaction<'_>, AppError> {
        let ctx = self.ctx.clone();
        let mut tx = self.conn.begin().await.map_err(AppError::TenantBinding)?;
        apply_binding(&mut *tx, &ctx, true).await?;
        Ok(ScopedTransaction { tx })
    }
}

pub struct ScopedTransaction<'c> {
    tx: Transaction<'c, Postgres>,
}

impl ScopedTransaction<'_> {
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    pub async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Define as variáveis de sessão que as políticas de RLS consomem.
/// `local = true` restringe o efeito à transação corrente.
async fn apply_binding(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    local: bool,
) -> Result<(), AppError> {
    // O flag de service account é sempre sobrescrito, nunca herdado de um
    // checkout anterior da mesma conexão física.
    let service_flag = if ctx.is_service_account() { "on" } else { "off" };

    sqlx::query("SELECT set_config('app.tenant_id', $1, $2)")
        .bind(ctx.tenant_id().to_string())
        .bind(local)
        .execute(&mut *conn)
        .await
        .map_err(AppError::TenantBinding)?;

    sqlx::query("SELECT set_config('app.user_id', $1, $2)")
        .bind(ctx.user_id().map(|u| u.to_string()).unwrap_or_default())
        .bind(local)
        .execute(&mut *conn)
        .await
        .map_err(AppError::TenantBinding)?;

    sqlx::query("SELECT set_config('app.service_account', $1, $2)")
        .bind(service_flag)
        .bind(local)
        .execute(&mut *conn)
        .await
        .map_err(AppError::TenantBinding)?;

    Ok(())
}
