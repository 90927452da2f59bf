// src/db/boleto_repo.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::boleto::Boleto};

// O repositório recebe o executor de fora (sessão escopada ou transação):
// a restrição por tenant vem da política de RLS amarrada à sessão, e o
// tenant_id explícito nas queries é cinto e suspensório, nunca a única linha
// de defesa.
#[derive(Clone)]
pub struct BoletoRepository;

impl BoletoRepository {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        barcode: &str,
        amount: Decimal,
        due_date: NaiveDate,
        payee_name: &str,
        payee_document: Option<&str>,
        schedule_id: Option<Uuid>,
    ) -> Result<Boleto, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let boleto = sqlx::query_as::<_, Boleto>(
            r#"
            INSERT INTO boletos (
                tenant_id, barcode, amount, due_date,
                payee_name, payee_document, schedule_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(barcode)
        .bind(amount)
        .bind(due_date)
        .bind(payee_name)
        .bind(payee_document)
        .bind(schedule_id)
        .fetch_one(executor)
        .await?;

        Ok(boleto)
    }

    pub async fn find_by_id<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Boleto>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let boleto = sqlx::query_as::<_, Boleto>(
            "SELECT * FROM boletos WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(executor)
        .await?;

        Ok(boleto)
    }

    pub async fn list_by_tenant<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
    ) -> Result<Vec<Boleto>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let boletos = sqlx::query_as::<_, Boleto>(
            "SELECT * FROM boletos WHERE tenant_id = $1 ORDER BY due_date ASC",
        )
        .bind(tenant_id)
        .fetch_all(executor)
        .await?;

        Ok(boletos)
    }

    /// Marca como pago. O filtro de status no UPDATE garante a transição
    /// única Registered -> Paid mesmo sob pagamentos concorrentes: a segunda
    /// tentativa não encontra linha e vira AlreadySettled.
    pub async fn mark_paid<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Boleto, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let boleto = sqlx::query_as::<_, Boleto>(
            r#"
            UPDATE boletos
            SET status = 'PAID', paid_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'REGISTERED'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(executor)
        .await?;

        boleto.ok_or(AppError::AlreadySettled)
    }

    /// Cancela um boleto ainda REGISTERED. Zero linhas significa transição
    /// inválida (já pago ou já cancelado); a existência do id é verificada
    /// antes, pelo chamador.
    pub async fn mark_canceled<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Boleto, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let boleto = sqlx::query_as::<_, Boleto>(
            r#"
            UPDATE boletos
            SET status = 'CANCELED'
            WHERE id = $1 AND tenant_id = $2 AND status = 'REGISTERED'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(executor)
        .await?;

        boleto.ok_or(AppError::AlreadySettled)
    }
}

impl Default for BoletoRepository {
    fn default() -> Self {
        Self::new()
    }
}
