//! Reconciliation of raw ledger rows into canonical table rows
//!
//! Both record types share the same first stage: every text cell is
//! repaired and cleaned into a [`NormalizedRecord`]. Amounts, dates and
//! budget classification strings are then parsed with the helpers below.

pub mod commitment;
pub mod payment_order;

pub use commitment::reconcile_commitments;
pub use payment_order::reconcile_payment_orders;

use crate::db::ledger_rows::{BudgetBreakdown, ExpenseNature};
use crate::error::{IngestError, IngestResult};
use crate::models::{FieldValue, RawRecord, RecordType};
use crate::normalize::{clean_cell, repair_encoding, NOT_IDENTIFIED, NOT_INFORMED};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static AMOUNT_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d,.\-]").expect("invalid amount regex"));

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("invalid year regex"));

/// Field aliases shared by both record types
pub(crate) const EXERCICIO: &[&str] = &["exercicio"];
pub(crate) const DOTACAO: &[&str] = &["dotacao_orcamentaria"];
pub(crate) const NUMERO_EMP: &[&str] = &["no_emp", "n_emp", "numero_emp"];
pub(crate) const NUMERO_PED: &[&str] = &["no_ped", "n_ped", "numero_ped"];
pub(crate) const DEVOLUCAO_GCV: &[&str] = &["devolucao_gcv"];
pub(crate) const UG: &[&str] = &["ug"];
pub(crate) const UO: &[&str] = &["uo"];
pub(crate) const CREDOR: &[&str] = &["credor"];
pub(crate) const NOME_CREDOR: &[&str] = &["nome_do_credor", "nome_credor"];
pub(crate) const CPF_CNPJ_CREDOR: &[&str] = &["cpf_cnpj_do_credor", "cpf_cnpj_credor"];

/// Text that stands for "no value" in amount and date cells
const BLANK_MARKERS: [&str; 6] = [
    "-",
    NOT_INFORMED,
    "NAO INFORMADO",
    NOT_IDENTIFIED,
    "NAO IDENTIFICADO",
    "00/00/0000",
];

/// Dotação positions of funcao, subfuncao, programa, paoe, natureza, fonte, iduso
const BUDGET_POSITIONS: [usize; 7] = [2, 3, 4, 5, 7, 8, 9];

/// Minimum part count of a padded dotação
const BUDGET_PARTS: usize = 11;

/// Raw record with every text cell repaired and whitespace-cleaned
///
/// Blank cells and the lone dash become [`FieldValue::Empty`]; the original
/// record is kept untouched for the audit snapshot.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    raw: RawRecord,
    fields: RawRecord,
}

impl NormalizedRecord {
    pub fn from_raw(raw: &RawRecord) -> Self {
        let mut fields = RawRecord::new();
        for field in raw.fields() {
            let value = match &field.value {
                FieldValue::Text(text) => {
                    let cleaned = clean_cell(&repair_encoding(text));
                    if cleaned.is_empty() || cleaned == "-" {
                        FieldValue::Empty
                    } else {
                        FieldValue::Text(cleaned)
                    }
                }
                other => other.clone(),
            };
            fields.push(field.name.clone(), value);
        }
        Self {
            raw: raw.clone(),
            fields,
        }
    }

    /// Record as it arrived
    pub fn raw(&self) -> &RawRecord {
        &self.raw
    }

    pub fn get(&self, aliases: &[&str]) -> Option<&FieldValue> {
        self.fields.get(aliases)
    }

    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        self.fields.text(aliases)
    }

    pub fn amount(&self, aliases: &[&str]) -> Option<f64> {
        self.get(aliases).and_then(parse_amount)
    }

    pub fn date(&self, aliases: &[&str]) -> Option<NaiveDateTime> {
        self.get(aliases).and_then(parse_date)
    }

    pub fn year(&self, aliases: &[&str]) -> Option<i32> {
        self.get(aliases).and_then(parse_year)
    }
}

/// Fail unless at least one record of the batch carries every field
pub fn require_fields(
    records: &[RawRecord],
    record_type: RecordType,
    required: &[(&str, &[&str])],
) -> IngestResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    for (label, aliases) in required {
        if !records.iter().any(|r| r.has_field(aliases)) {
            return Err(IngestError::Schema(format!(
                "{} batch has no '{}' field",
                record_type, label
            )));
        }
    }
    Ok(())
}

/// Drops every `.` followed by three digits
fn strip_thousands_dots(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| {
            !(c == '.'
                && chars.len() > i + 3
                && chars[i + 1..=i + 3].iter().all(char::is_ascii_digit))
        })
        .map(|(_, &c)| c)
        .collect()
}

/// pt-BR aware amount (`"1.234,56"` → 1234.56, `"1.000"` → 1000.0,
/// `"R$ 10,00"` → 10.0)
///
/// A dot followed by three digits is a thousands separator; any other dot,
/// or a comma, is the decimal point. Blank markers give `None`.
pub fn parse_amount(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Integer(i) => Some(*i as f64),
        FieldValue::Number(n) if n.is_finite() => Some(*n),
        FieldValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || BLANK_MARKERS.contains(&trimmed) {
                return None;
            }
            let digits = AMOUNT_NOISE.replace_all(trimmed, "");
            strip_thousands_dots(&digits)
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// Date or timestamp from `dd/mm/yyyy[ hh:mm[:ss]]` or ISO text
///
/// `00/00/0000` and other blank markers give `None`.
pub fn parse_date(value: &FieldValue) -> Option<NaiveDateTime> {
    match value {
        FieldValue::DateTime(dt) => Some(*dt),
        FieldValue::Date(d) => d.and_hms_opt(0, 0, 0),
        FieldValue::Text(text) => parse_date_text(text),
        _ => None,
    }
}

fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty()
        || BLANK_MARKERS.contains(&trimmed)
        || trimmed.starts_with("00/00/0000")
    {
        return None;
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }

    let slashed = trimmed.replace('-', "/");
    for format in ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&slashed, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(&slashed, "%d/%m/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Fiscal year: the first four-digit group of the cell
pub fn parse_year(value: &FieldValue) -> Option<i32> {
    let text = value.as_text()?;
    YEAR.find(&text)?.as_str().parse().ok()
}

/// Most frequent year of the batch; ties go to the earliest year
pub fn modal_year<I>(years: I) -> Option<i32>
where
    I: IntoIterator<Item = Option<i32>>,
{
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for year in years.into_iter().flatten() {
        *counts.entry(year).or_default() += 1;
    }
    let mut best: Option<(i32, usize)> = None;
    for (year, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((year, count));
        }
    }
    best.map(|(year, _)| year)
}

/// Round half away from zero to cents
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `minuend - subtrahend` in cents; absent sides count as zero, both absent is `None`
pub fn net_amount(minuend: Option<f64>, subtrahend: Option<f64>) -> Option<f64> {
    if minuend.is_none() && subtrahend.is_none() {
        return None;
    }
    Some(round2(minuend.unwrap_or(0.0) - subtrahend.unwrap_or(0.0)))
}

/// Commitment dotação: non-empty trimmed parts, padded to eleven with the
/// not-informed sentinel, picked at the budget positions
pub fn split_budget_padded(dotacao: Option<&str>) -> BudgetBreakdown {
    let mut parts: Vec<String> = dotacao
        .map(|d| {
            d.split('.')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if parts.len() < BUDGET_PARTS {
        parts.resize(BUDGET_PARTS, NOT_INFORMED.to_string());
    }
    budget_from_parts(|position| Some(parts[position].clone()))
}

/// Payment-order dotação: raw `.` split, sentinel where a position is missing
///
/// The source layout has no `fonte` part, so it stays empty.
pub fn split_budget_positional(dotacao: Option<&str>) -> BudgetBreakdown {
    let parts: Vec<&str> = dotacao.map(|d| d.split('.').collect()).unwrap_or_default();
    let mut budget = budget_from_parts(|position| {
        Some(match parts.get(position) {
            Some(part) if !part.trim().is_empty() => part.trim().to_string(),
            Some(_) => return None,
            None => NOT_INFORMED.to_string(),
        })
    });
    budget.fonte = None;
    budget
}

fn budget_from_parts<F>(part: F) -> BudgetBreakdown
where
    F: Fn(usize) -> Option<String>,
{
    let [funcao, subfuncao, programa, paoe, natureza, fonte, iduso] = BUDGET_POSITIONS;
    BudgetBreakdown {
        funcao: part(funcao),
        subfuncao: part(subfuncao),
        programa_governo: part(programa),
        paoe: part(paoe),
        natureza_despesa: part(natureza),
        fonte: part(fonte),
        iduso: part(iduso),
    }
}

/// Expense nature by character position: category, group, modality (2..4)
///
/// Each part needs the nature to reach its end position; otherwise, and for
/// a sentinel nature, the part is the not-informed sentinel.
pub fn split_expense_nature(natureza: Option<&str>) -> ExpenseNature {
    let chars: Vec<char> = match natureza.map(str::trim) {
        Some(n) if !n.is_empty() && n != NOT_INFORMED && n != NOT_IDENTIFIED => n.chars().collect(),
        _ => Vec::new(),
    };
    let slice = |start: usize, end: usize| -> Option<String> {
        Some(if chars.len() >= end {
            chars[start..end].iter().collect()
        } else {
            NOT_INFORMED.to_string()
        })
    };
    ExpenseNature {
        cat_econ: slice(0, 1),
        grupo: slice(1, 2),
        modalidade: slice(2, 4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_parse_amount_pt_br() {
        assert_eq!(parse_amount(&text("1.234,56")), Some(1234.56));
        assert_eq!(parse_amount(&text("R$ 10,00")), Some(10.0));
        assert_eq!(parse_amount(&text("-1.000,50")), Some(-1000.5));
        assert_eq!(parse_amount(&text("1234.5")), Some(1234.5));
        assert_eq!(parse_amount(&FieldValue::Integer(7)), Some(7.0));
        assert_eq!(parse_amount(&FieldValue::Number(f64::NAN)), None);
    }

    #[test]
    fn test_parse_amount_thousands_dots_without_comma() {
        assert_eq!(parse_amount(&text("1.000")), Some(1000.0));
        assert_eq!(parse_amount(&text("12.345.678")), Some(12345678.0));
        assert_eq!(parse_amount(&text("1.000,50")), Some(1000.5));
        assert_eq!(parse_amount(&text("10.50")), Some(10.5));
    }

    #[test]
    fn test_parse_amount_blank_markers() {
        for blank in ["", " ", "-", "NÃO INFORMADO", "NAO INFORMADO", "abc"] {
            assert_eq!(parse_amount(&text(blank)), None, "{blank:?}");
        }
        assert_eq!(parse_amount(&FieldValue::Empty), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let at = |h, m, s| Some(day.and_hms_opt(h, m, s).unwrap());
        assert_eq!(parse_date(&text("15/03/2024")), at(0, 0, 0));
        assert_eq!(parse_date(&text("15-03-2024")), at(0, 0, 0));
        assert_eq!(parse_date(&text("2024-03-15")), at(0, 0, 0));
        assert_eq!(parse_date(&text("15/03/2024 10:20:30")), at(10, 20, 30));
        assert_eq!(parse_date(&text("15/03/2024 10:20")), at(10, 20, 0));
        assert_eq!(parse_date(&text("2024-03-15 08:00:00")), at(8, 0, 0));
        assert_eq!(parse_date(&FieldValue::Date(day)), at(0, 0, 0));
    }

    #[test]
    fn test_parse_date_blanks() {
        for blank in ["00/00/0000", "00/00/0000 00:00:00", "-", "", "NÃO INFORMADO", "31/02/2024"] {
            assert_eq!(parse_date(&text(blank)), None, "{blank:?}");
        }
    }

    #[test]
    fn test_parse_year_and_mode() {
        assert_eq!(parse_year(&FieldValue::Integer(2025)), Some(2025));
        assert_eq!(parse_year(&text("Exercício 2026")), Some(2026));
        assert_eq!(parse_year(&text("25")), None);

        assert_eq!(modal_year([Some(2025), Some(2026), Some(2026), None]), Some(2026));
        assert_eq!(modal_year([Some(2026), Some(2025)]), Some(2025));
        assert_eq!(modal_year([None, None]), None);
    }

    #[test]
    fn test_net_amount_rounds_to_cents() {
        assert_eq!(net_amount(Some(100.0), Some(33.333)), Some(66.67));
        assert_eq!(net_amount(Some(10.0), None), Some(10.0));
        assert_eq!(net_amount(None, None), None);
    }

    #[test]
    fn test_split_budget_padded() {
        let budget = split_budget_padded(Some("11.101.12.361.0517.2545.3.3.90.39.0100.0"));
        assert_eq!(budget.funcao.as_deref(), Some("12"));
        assert_eq!(budget.subfuncao.as_deref(), Some("361"));
        assert_eq!(budget.programa_governo.as_deref(), Some("0517"));
        assert_eq!(budget.paoe.as_deref(), Some("2545"));
        assert_eq!(budget.natureza_despesa.as_deref(), Some("3"));
        assert_eq!(budget.fonte.as_deref(), Some("90"));
        assert_eq!(budget.iduso.as_deref(), Some("39"));

        let short = split_budget_padded(Some("11..101.12"));
        assert_eq!(short.funcao.as_deref(), Some("12"));
        assert_eq!(short.subfuncao.as_deref(), Some(NOT_INFORMED));

        let missing = split_budget_padded(None);
        assert_eq!(missing.iduso.as_deref(), Some(NOT_INFORMED));
    }

    #[test]
    fn test_split_budget_positional() {
        let budget = split_budget_positional(Some("11.101.12.361.0517.2545.01.33903900.0100.1"));
        assert_eq!(budget.funcao.as_deref(), Some("12"));
        assert_eq!(budget.natureza_despesa.as_deref(), Some("33903900"));
        assert_eq!(budget.iduso.as_deref(), Some("1"));
        assert_eq!(budget.fonte, None);

        let short = split_budget_positional(Some("11.101.12"));
        assert_eq!(short.subfuncao.as_deref(), Some(NOT_INFORMED));
        assert_eq!(short.iduso.as_deref(), Some(NOT_INFORMED));
    }

    #[test]
    fn test_split_expense_nature() {
        let nature = split_expense_nature(Some("33903900"));
        assert_eq!(nature.cat_econ.as_deref(), Some("3"));
        assert_eq!(nature.grupo.as_deref(), Some("3"));
        assert_eq!(nature.modalidade.as_deref(), Some("90"));

        let partial = split_expense_nature(Some("33"));
        assert_eq!(partial.grupo.as_deref(), Some("3"));
        assert_eq!(partial.modalidade.as_deref(), Some(NOT_INFORMED));

        let sentinel = split_expense_nature(Some(NOT_INFORMED));
        assert_eq!(sentinel.cat_econ.as_deref(), Some(NOT_INFORMED));
    }

    #[test]
    fn test_normalized_record_repairs_and_blanks() {
        let raw = RawRecord::from_pairs([
            ("SituaÇõÇœo", text("  Empenho   EMP  ")),
            ("UG", text(" - ")),
            ("Histórico", text("GESTÇŸO \r\n ESCOLAR")),
        ]);
        let record = NormalizedRecord::from_raw(&raw);
        assert_eq!(record.text(&["situacao"]).as_deref(), Some("Empenho EMP"));
        assert_eq!(record.get(&["ug"]), Some(&FieldValue::Empty));
        assert_eq!(record.text(&["historico"]).as_deref(), Some("GESTÃO ESCOLAR"));
        assert_eq!(record.raw(), &raw);
    }

    #[test]
    fn test_require_fields() {
        let records = vec![RawRecord::from_pairs([("Exercício", FieldValue::Integer(2025))])];
        let err = require_fields(
            &records,
            RecordType::Commitment,
            &[("exercicio", EXERCICIO), ("dotacao_orcamentaria", DOTACAO)],
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Schema(msg) if msg.contains("dotacao_orcamentaria")));
        assert!(require_fields(&[], RecordType::Commitment, &[("exercicio", EXERCICIO)]).is_ok());
    }
}
