//! Payment-order (`nob`) reconciliation
//!
//! Payment orders carry no planning key. Reversed or reversing orders are
//! dropped, the commitment number is filed as current-year or carried-over,
//! and the budget string is decomposed by position.

use super::{
    net_amount, require_fields, split_budget_positional, split_expense_nature, NormalizedRecord,
    CPF_CNPJ_CREDOR, CREDOR, DEVOLUCAO_GCV, DOTACAO, EXERCICIO, NOME_CREDOR, NUMERO_EMP,
    NUMERO_PED, UG, UO,
};
use crate::db::ledger_rows::PaymentOrderRow;
use crate::error::IngestResult;
use crate::models::{FieldValue, RawRecord, RecordType};
use crate::normalize::NOT_INFORMED;
use crate::services::snapshot::snapshot_json;
use tracing::{info, warn};

const NUMERO_NOB: &[&str] = &["n_nob", "no_nob", "numero_nob"];
const NUMERO_NOB_ESTORNO: &[&str] = &[
    "n_nob_estorno_estornado",
    "no_nob_estorno_estornado",
    "numero_nob_estorno",
];
const NUMERO_LIQ: &[&str] = &["n_liq", "no_liq", "numero_liq"];
const VALOR_NOB: &[&str] = &["valor_nob"];
const DATA_NOB: &[&str] = &["data_nob"];
const DATA_CADASTRO_NOB: &[&str] = &["data_cadastro_nob"];
const DATA_HORA_CADASTRO_LIQ: &[&str] = &["data_hora_de_cadastro_da_liq", "data_hora_cadastro_liq"];
const NOME_FONTE_RECURSO: &[&str] = &["nome_da_fonte_de_recurso", "nome_fonte_recurso"];
const NOME_CREDOR_PRINCIPAL: &[&str] = &["nome_do_credor_principal", "nome_credor_principal"];
const CPF_CNPJ_CREDOR_PRINCIPAL: &[&str] = &[
    "cpf_cnpj_do_credor_principal",
    "cpf_cnpj_credor_principal",
];
const HISTORICO_LIQ: &[&str] = &["historico_liq"];

/// Whether the order has no reversal number (blank or the not-informed sentinel)
pub fn has_no_reversal(numero_nob_estorno: Option<&str>) -> bool {
    match numero_nob_estorno.map(|n| n.trim().to_uppercase()) {
        None => true,
        Some(n) => n.is_empty() || n == "NAO INFORMADO" || n == NOT_INFORMED,
    }
}

/// Two-digit year of a commitment number (`"11101.0001.24.000123"` → `"24"`)
fn commitment_year(numero_emp: &str) -> Option<&str> {
    let part = numero_emp.split('.').nth(2)?;
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(&part[part.len().saturating_sub(2)..])
}

/// File the commitment number as current-year or carried-over
///
/// Returns `(empenho_atual, empenho_rp)`; the side not taken holds the
/// not-informed sentinel. Without a commitment number both sides do.
pub fn split_commitment(numero_emp: Option<&str>, exercicio: Option<&FieldValue>) -> (String, String) {
    let Some(numero) = numero_emp else {
        return (NOT_INFORMED.to_string(), NOT_INFORMED.to_string());
    };

    let fiscal = exercicio
        .and_then(FieldValue::as_text)
        .map(|text| {
            let text = text.trim();
            let start = text
                .char_indices()
                .rev()
                .nth(1)
                .map_or(0, |(index, _)| index);
            text[start..].to_string()
        });

    let same_year = match (commitment_year(numero), fiscal.as_deref()) {
        (Some(year), Some(fiscal)) => year == fiscal,
        _ => false,
    };

    if same_year {
        (numero.to_string(), NOT_INFORMED.to_string())
    } else {
        (NOT_INFORMED.to_string(), numero.to_string())
    }
}

/// Reconcile a payment-order batch into table rows
///
/// Fails only when the batch lacks `exercicio` or `dotacao_orcamentaria`.
pub fn reconcile_payment_orders(records: &[RawRecord]) -> IngestResult<Vec<PaymentOrderRow>> {
    require_fields(
        records,
        RecordType::PaymentOrder,
        &[("exercicio", EXERCICIO), ("dotacao_orcamentaria", DOTACAO)],
    )?;

    if !records.is_empty() && !records.iter().any(|r| r.has_field(NUMERO_NOB_ESTORNO)) {
        warn!("Payment-order batch has no reversal number field; keeping every row");
    }

    let kept: Vec<NormalizedRecord> = records
        .iter()
        .map(NormalizedRecord::from_raw)
        .filter(|r| has_no_reversal(r.text(NUMERO_NOB_ESTORNO).as_deref()))
        .collect();
    info!(
        total = records.len(),
        removed = records.len() - kept.len(),
        "Reversed payment orders removed"
    );

    kept.iter().map(build_row).collect()
}

fn build_row(record: &NormalizedRecord) -> IngestResult<PaymentOrderRow> {
    let numero_emp = record.text(NUMERO_EMP);
    let (empenho_atual, empenho_rp) =
        split_commitment(numero_emp.as_deref(), record.get(EXERCICIO));

    let budget = split_budget_positional(record.text(DOTACAO).as_deref());
    let nature = split_expense_nature(budget.natureza_despesa.as_deref());

    let valor_nob = record.amount(VALOR_NOB);
    let devolucao_gcv = record.amount(DEVOLUCAO_GCV);

    Ok(PaymentOrderRow {
        exercicio: record.year(EXERCICIO).map(i64::from),
        numero_nob: record.text(NUMERO_NOB),
        numero_nob_estorno: record
            .text(NUMERO_NOB_ESTORNO)
            .or_else(|| Some(NOT_INFORMED.to_string())),
        numero_liq: record.text(NUMERO_LIQ),
        numero_emp,
        numero_ped: record.text(NUMERO_PED),
        valor_nob,
        devolucao_gcv,
        valor_nob_gcv: net_amount(valor_nob, devolucao_gcv),
        data_nob: record.date(DATA_NOB),
        data_cadastro_nob: record.date(DATA_CADASTRO_NOB),
        data_hora_cadastro_liq: record.date(DATA_HORA_CADASTRO_LIQ),
        dotacao_orcamentaria: record.text(DOTACAO),
        nome_fonte_recurso: record.text(NOME_FONTE_RECURSO),
        ug: record.text(UG),
        uo: record.text(UO),
        nome_credor_principal: record.text(NOME_CREDOR_PRINCIPAL),
        cpf_cnpj_credor_principal: record.text(CPF_CNPJ_CREDOR_PRINCIPAL),
        credor: record.text(CREDOR),
        nome_credor: record.text(NOME_CREDOR),
        cpf_cnpj_credor: record.text(CPF_CNPJ_CREDOR),
        historico_liq: record.text(HISTORICO_LIQ),
        empenho_atual: Some(empenho_atual),
        empenho_rp: Some(empenho_rp),
        budget,
        nature,
        raw_payload: snapshot_json(record.raw())?,
    })
}
