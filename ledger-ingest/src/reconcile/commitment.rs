//! Commitment (`emp`) reconciliation
//!
//! Fully reversed commitments are dropped first. The batch's dominant fiscal
//! year picks the key scheme, the cascade assigns a planning key per
//! narrative, forced overrides are applied by commitment number, and the
//! budget and nature strings are decomposed into their columns.

use super::{
    modal_year, net_amount, require_fields, split_budget_padded, split_expense_nature,
    NormalizedRecord, CPF_CNPJ_CREDOR, CREDOR, DEVOLUCAO_GCV, DOTACAO, EXERCICIO, NOME_CREDOR,
    NUMERO_EMP, NUMERO_PED, UG, UO,
};
use crate::db::ledger_rows::CommitmentRow;
use crate::error::IngestResult;
use crate::matching::{
    apply_forced_overrides, decompose_key, MatchResult, MatcherSettings, PlanningKeyMatcher,
};
use crate::models::{KeyScheme, RawRecord, RecordType};
use crate::normalize::{canonicalize_comparison_form, clean_narrative, strip_disallowed};
use crate::services::snapshot::snapshot_json;
use crate::vocabulary::MatchingResources;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

/// Status fragment of a fully reversed commitment (comparison form)
const FULLY_REVERSED_STATUS: &str = "empenho emp com estorno total";

/// Expense type assigned to scholarship narratives
const SCHOLARSHIP_EXPENSE: &str = "Bolsa";

static SCHOLARSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bbolsas?\b").expect("invalid scholarship regex"));

const SITUACAO: &[&str] = &["situacao"];
const HISTORICO: &[&str] = &["historico"];
const NUMERO_CONTRATO: &[&str] = &["no_contrato", "numero_contrato"];
const NUMERO_CONVENIO: &[&str] = &["no_convenio", "numero_convenio"];
const ELEMENTO: &[&str] = &["elemento"];
const NOME_UO: &[&str] = &["nome_da_unidade_orcamentaria", "nome_unidade_orcamentaria"];
const NOME_UG: &[&str] = &["nome_da_unidade_gestora", "nome_unidade_gestora"];
const DATA_EMISSAO: &[&str] = &["data_emissao"];
const DATA_CRIACAO: &[&str] = &["data_criacao"];
const VALOR_EMP: &[&str] = &["valor_emp"];
const TIPO_EMPENHO: &[&str] = &["tipo_empenho"];
const TIPO_DESPESA: &[&str] = &["tipo_de_despesa", "tipo_despesa"];
const CATEGORIA_CREDOR: &[&str] = &["categoria_do_credor", "categoria_credor"];

/// Fuzzy tier options of a commitment run
#[derive(Debug, Clone, Copy)]
pub struct FuzzyOptions {
    pub enabled: bool,
    pub cutoff: f64,
}

impl Default for FuzzyOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            cutoff: ledger_common::config::DEFAULT_FUZZY_CUTOFF,
        }
    }
}

/// Whether the status marks a fully reversed commitment
pub fn is_fully_reversed(situacao: Option<&str>) -> bool {
    situacao
        .map(|s| canonicalize_comparison_form(s).contains(FULLY_REVERSED_STATUS))
        .unwrap_or(false)
}

/// Narrative ready for the cascade and for storage
pub fn prepare_narrative(historico: Option<&str>) -> String {
    strip_disallowed(&clean_narrative(historico.unwrap_or_default()))
}

/// Reconcile a commitment batch into table rows
///
/// Fails only when the batch lacks `exercicio` or `dotacao_orcamentaria`.
pub fn reconcile_commitments(
    records: &[RawRecord],
    resources: &MatchingResources,
    fuzzy: FuzzyOptions,
) -> IngestResult<Vec<CommitmentRow>> {
    require_fields(
        records,
        RecordType::Commitment,
        &[("exercicio", EXERCICIO), ("dotacao_orcamentaria", DOTACAO)],
    )?;

    let normalized: Vec<NormalizedRecord> = records
        .iter()
        .map(NormalizedRecord::from_raw)
        .filter(|r| !is_fully_reversed(r.text(SITUACAO).as_deref()))
        .collect();
    let removed = records.len() - normalized.len();
    info!(
        total = records.len(),
        removed, "Fully reversed commitments removed"
    );

    let fiscal_year = modal_year(normalized.iter().map(|r| r.year(EXERCICIO)));
    let scheme = KeyScheme::for_fiscal_year(fiscal_year);
    info!(?fiscal_year, ?scheme, "Key scheme selected");

    let matcher = PlanningKeyMatcher::new(
        resources.vocabulary.clone(),
        resources.special_cases.clone(),
        MatcherSettings {
            segment_width: scheme.segment_width(),
            fuzzy_enabled: fuzzy.enabled,
            fuzzy_cutoff: fuzzy.cutoff,
        },
    );

    let narratives: Vec<String> = normalized
        .iter()
        .map(|r| prepare_narrative(r.text(HISTORICO).as_deref()))
        .collect();
    let record_ids: Vec<String> = normalized
        .iter()
        .map(|r| r.text(NUMERO_EMP).unwrap_or_default())
        .collect();

    let mut results = matcher.identify_all(
        record_ids
            .iter()
            .map(String::as_str)
            .zip(narratives.iter().map(String::as_str)),
    );
    apply_forced_overrides(&record_ids, &mut results, &resources.overrides);

    normalized
        .iter()
        .zip(narratives)
        .zip(results)
        .map(|((record, narrative), result)| build_row(record, narrative, &result, scheme))
        .collect()
}

fn build_row(
    record: &NormalizedRecord,
    narrative: String,
    result: &MatchResult,
    scheme: KeyScheme,
) -> IngestResult<CommitmentRow> {
    let key = result.final_key().to_string();
    let (chave, chave_planejamento, planning_segments) = match scheme {
        KeyScheme::Legacy => {
            let segments = decompose_key(&key, scheme.segment_width());
            (None, Some(key), Some(segments))
        }
        KeyScheme::Current => (Some(key), None, None),
    };

    let budget = split_budget_padded(record.text(DOTACAO).as_deref());
    let nature = split_expense_nature(budget.natureza_despesa.as_deref());

    let tipo_despesa = if SCHOLARSHIP.is_match(&narrative.to_lowercase()) {
        Some(SCHOLARSHIP_EXPENSE.to_string())
    } else {
        record.text(TIPO_DESPESA)
    };

    let valor_emp = record.amount(VALOR_EMP);
    let devolucao_gcv = record.amount(DEVOLUCAO_GCV);

    Ok(CommitmentRow {
        chave,
        chave_planejamento,
        planning_segments,
        exercicio: record.year(EXERCICIO).map(i64::from),
        situacao: record.text(SITUACAO),
        historico: Some(narrative),
        numero_emp: record.text(NUMERO_EMP),
        numero_ped: record.text(NUMERO_PED),
        numero_contrato: record.text(NUMERO_CONTRATO),
        numero_convenio: record.text(NUMERO_CONVENIO),
        dotacao_orcamentaria: record.text(DOTACAO),
        budget,
        nature,
        elemento: record.text(ELEMENTO),
        uo: record.text(UO),
        nome_unidade_orcamentaria: record.text(NOME_UO),
        ug: record.text(UG),
        nome_unidade_gestora: record.text(NOME_UG),
        data_emissao: record.date(DATA_EMISSAO),
        data_criacao: record.date(DATA_CRIACAO),
        valor_emp,
        devolucao_gcv,
        valor_emp_devolucao_gcv: net_amount(valor_emp, devolucao_gcv),
        tipo_empenho: record.text(TIPO_EMPENHO),
        tipo_despesa,
        credor: record.text(CREDOR),
        nome_credor: record.text(NOME_CREDOR),
        cpf_cnpj_credor: record.text(CPF_CNPJ_CREDOR),
        categoria_credor: record.text(CATEGORIA_CREDOR),
        raw_payload: snapshot_json(record.raw())?,
    })
}
