// src/services/settlement.rs
//
// Cálculo de liquidação de boleto: multa, juros e desconto em função da
// data de pagamento. Função pura de (boleto, data) — chamadas repetidas com
// as mesmas entradas produzem o mesmo resultado, centavo a centavo, o que
// garante retries idempotentes e trilha de auditoria reprodutível.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    common::error::AppError,
    models::boleto::{Boleto, BoletoStatus, SettlementResult},
};

/// Multa fixa de 2% sobre o valor original quando vencido.
const FINE_RATE: Decimal = dec!(0.02);
/// Juros simples de 1% ao mês (30 dias), proporcional aos dias de atraso.
const MONTHLY_INTEREST_RATE: Decimal = dec!(0.01);
/// Desconto de 1% para pagamento com mais de 10 dias de antecedência.
const EARLY_DISCOUNT_RATE: Decimal = dec!(0.01);
const EARLY_DISCOUNT_MIN_DAYS: i64 = 10;

/// Calcula a liquidação de um boleto na data informada.
///
/// Toda a aritmética usa `Decimal` (ponto fixo); o arredondamento para duas
/// casas acontece somente no `total`, nunca nos componentes intermediários.
pub fn settle(boleto: &Boleto, payment_date: NaiveDate) -> Result<SettlementResult, AppError> {
    if boleto.status == BoletoStatus::Paid {
        return Err(AppError::AlreadySettled);
    }

    let original = boleto.amount;
    let days_overdue = (payment_date - boleto.due_date).num_days();
    let is_overdue = payment_date > boleto.due_date;

    let (fine, interest) = if is_overdue {
        let fine = original * FINE_RATE;
        // Juros simples, não compostos: 1% * (dias / 30)
        let interest =
            original * MONTHLY_INTEREST_RATE * Decimal::from(days_overdue) / dec!(30);
        (fine, interest)
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };

    // Antecedência estritamente maior que 10 dias; exatamente 10 não conta.
    let discount = if -days_overdue > EARLY_DISCOUNT_MIN_DAYS {
        original * EARLY_DISCOUNT_RATE
    } else {
        Decimal::ZERO
    };

    let total = (original + fine + interest - discount)
        .max(Decimal::ZERO)
        .round_dp(2);

    Ok(SettlementResult {
        original_amount: original,
        fine,
        interest,
        discount,
        total,
        days_overdue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn boleto(amount: Decimal, due: NaiveDate) -> Boleto {
        Boleto {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            barcode: "0".repeat(44),
            amount,
            due_date: due,
            payee_name: "Energia Elétrica SA".to_string(),
            payee_document: None,
            status: BoletoStatus::Registered,
            schedule_id: None,
            created_at: None,
            paid_at: None,
        }
    }

    fn due() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()
    }

    #[test]
    fn no_vencimento_nao_ha_multa_nem_juros() {
        let r = settle(&boleto(dec!(100.00), due()), due()).unwrap();
        assert_eq!(r.fine, Decimal::ZERO);
        assert_eq!(r.interest, Decimal::ZERO);
        assert_eq!(r.discount, Decimal::ZERO);
        assert_eq!(r.total, dec!(100.00));
        assert_eq!(r.days_overdue, 0);
    }

    #[test]
    fn quinze_dias_de_atraso() {
        // Exemplo de referência: 100.00 com 15 dias de atraso
        // multa = 2.00, juros = 100 * 0.01 * 15/30 = 0.50, total = 102.50
        let r = settle(&boleto(dec!(100.00), due()), due() + Duration::days(15)).unwrap();
        assert_eq!(r.fine, dec!(2.00));
        assert_eq!(r.interest, dec!(0.50));
        assert_eq!(r.total, dec!(102.50));
        assert_eq!(r.days_overdue, 15);
    }

    #[test]
    fn um_dia_de_atraso_ja_aplica_multa_cheia() {
        let r = settle(&boleto(dec!(300.00), due()), due() + Duration::days(1)).unwrap();
        assert_eq!(r.fine, dec!(6.00));
        // 300 * 0.01 * 1/30 = 0.10
        assert_eq!(r.interest.round_dp(2), dec!(0.10));
    }

    #[test]
    fn desconto_somente_com_mais_de_dez_dias_de_antecedencia() {
        // Exatamente 10 dias antes: sem desconto (fronteira exclusiva)
        let r = settle(&boleto(dec!(100.00), due()), due() - Duration::days(10)).unwrap();
        assert_eq!(r.discount, Decimal::ZERO);
        assert_eq!(r.total, dec!(100.00));

        // 11 dias antes: 1% de desconto
        let r = settle(&boleto(dec!(100.00), due()), due() - Duration::days(11)).unwrap();
        assert_eq!(r.discount, dec!(1.00));
        assert_eq!(r.total, dec!(99.00));
        assert_eq!(r.days_overdue, -11);
    }

    #[test]
    fn pagamento_antecipado_nao_gera_multa() {
        let r = settle(&boleto(dec!(100.00), due()), due() - Duration::days(30)).unwrap();
        assert_eq!(r.fine, Decimal::ZERO);
        assert_eq!(r.interest, Decimal::ZERO);
    }

    #[test]
    fn total_nunca_e_negativo() {
        let r = settle(&boleto(dec!(0.00), due()), due() - Duration::days(60)).unwrap();
        assert_eq!(r.total, Decimal::ZERO);
    }

    #[test]
    fn arredondamento_somente_no_total() {
        // 7 dias de atraso sobre 99.99: juros = 99.99 * 0.01 * 7/30 = 0.23331
        let r = settle(&boleto(dec!(99.99), due()), due() + Duration::days(7)).unwrap();
        assert_eq!(r.interest, dec!(99.99) * dec!(0.01) * dec!(7) / dec!(30));
        // total = 99.99 + 1.9998 + 0.23331 = 102.22311 -> 102.22
        assert_eq!(r.total, dec!(102.22));
    }

    #[test]
    fn settle_e_puro_e_idempotente() {
        let b = boleto(dec!(1234.56), due());
        let date = due() + Duration::days(42);
        assert_eq!(settle(&b, date).unwrap(), settle(&b, date).unwrap());
    }

    #[test]
    fn boleto_pago_rejeita_nova_liquidacao() {
        let mut b = boleto(dec!(100.00), due());
        b.status = BoletoStatus::Paid;
        assert!(matches!(settle(&b, due()), Err(AppError::AlreadySettled)));
    }
}
