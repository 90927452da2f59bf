// src/services/boleto_decoder.rs
//
// Decodificação da linha de 44 dígitos do boleto bancário (padrão FEBRABAN).
// Função pura: nenhuma chamada de rede, nenhum acesso a banco.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::{common::error::AppError, models::boleto::DecodedBoleto};

/// Data-base do "fator de vencimento" definida pela FEBRABAN.
const DUE_DATE_EPOCH: (i32, u32, u32) = (1997, 10, 7);

/// Posições fixas dentro dos 44 dígitos.
const BANK_CODE_RANGE: std::ops::Range<usize> = 0..3;
const DUE_FACTOR_RANGE: std::ops::Range<usize> = 5..9;
const AMOUNT_RANGE: std::ops::Range<usize> = 9..19;

/// Decodifica um código de barras de 44 dígitos em valor, vencimento e
/// referência do beneficiário.
///
/// Os dois campos numéricos são tratados como inteiros sem sinal com zeros
/// à esquerda significativos: o valor tem duas casas decimais implícitas
/// (centavos) e o vencimento é `1997-10-07 + fator` dias. Fator 0000
/// significa "sem vencimento codificado" e cai para a data de hoje.
pub fn decode_barcode(barcode: &str) -> Result<DecodedBoleto, AppError> {
    if barcode.len() != 44 {
        return Err(AppError::MalformedBarcode(format!(
            "esperados 44 dígitos, recebidos {}",
            barcode.len()
        )));
    }
    if !barcode.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::MalformedBarcode(
            "o código deve conter apenas dígitos".to_string(),
        ));
    }

    // A validação acima garante que os slices e parses abaixo nunca falham.
    let due_factor: i64 = barcode[DUE_FACTOR_RANGE]
        .parse()
        .map_err(|_| AppError::MalformedBarcode("fator de vencimento ilegível".to_string()))?;
    let amount_cents: i64 = barcode[AMOUNT_RANGE]
        .parse()
        .map_err(|_| AppError::MalformedBarcode("campo de valor ilegível".to_string()))?;

    let (ey, em, ed) = DUE_DATE_EPOCH;
    let due_date = if due_factor == 0 {
        Utc::now().date_naive()
    } else {
        NaiveDate::from_ymd_opt(ey, em, ed)
            .ok_or_else(|| anyhow::anyhow!("data-base inválida"))?
            + Duration::days(due_factor)
    };

    Ok(DecodedBoleto {
        amount: Decimal::new(amount_cents, 2),
        due_date,
        payee_ref: barcode[BANK_CODE_RANGE].to_string(),
    })
}
