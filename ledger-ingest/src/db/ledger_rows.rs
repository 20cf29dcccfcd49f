//! Canonical ledger rows and their table mapping
//!
//! Each record type has a typed row whose `values()` line up with its
//! `COLUMNS`. Generation metadata (upload id, snapshot, timestamps, uploader,
//! activity flag) is appended by [`insert_row`].

use crate::models::{RecordType, UploadContext};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection};

/// Columns written for every row on top of the record's own columns
pub const GENERATION_COLUMNS: [&str; 6] = [
    "upload_id",
    "raw_payload",
    "data_atualizacao",
    "data_arquivo",
    "user_email",
    "ativo",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Bindable cell value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
}

impl SqlValue {
    pub fn text(value: &Option<String>) -> Self {
        value.clone().map_or(SqlValue::Null, SqlValue::Text)
    }

    pub fn integer(value: Option<i64>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Integer)
    }

    pub fn real(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => SqlValue::Real(v),
            _ => SqlValue::Null,
        }
    }

    pub fn timestamp(value: Option<NaiveDateTime>) -> Self {
        value.map_or(SqlValue::Null, |ts| {
            SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string())
        })
    }

    pub fn date(value: Option<NaiveDate>) -> Self {
        value.map_or(SqlValue::Null, |d| SqlValue::Text(d.format("%Y-%m-%d").to_string()))
    }
}

/// A canonical row of one record type's table
pub trait LedgerRow: Send + Sync {
    const RECORD_TYPE: RecordType;

    /// Record columns, in the order of [`LedgerRow::values`]
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Vec<SqlValue>;

    /// JSON snapshot of the pre-transformation fields
    fn raw_payload(&self) -> &str;
}

/// Budget allocation segments (`dotacao_orcamentaria` split on `.`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetBreakdown {
    pub funcao: Option<String>,
    pub subfuncao: Option<String>,
    pub programa_governo: Option<String>,
    pub paoe: Option<String>,
    pub natureza_despesa: Option<String>,
    pub fonte: Option<String>,
    pub iduso: Option<String>,
}

/// Expense-nature segments (`natureza_despesa` by position)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseNature {
    pub cat_econ: Option<String>,
    pub grupo: Option<String>,
    pub modalidade: Option<String>,
}

/// Commitment (`emp`) row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitmentRow {
    /// Key under the current scheme
    pub chave: Option<String>,
    /// Key under the legacy scheme
    pub chave_planejamento: Option<String>,
    /// Legacy planning segments; `None` under the current scheme
    pub planning_segments: Option<Vec<String>>,
    pub exercicio: Option<i64>,
    pub situacao: Option<String>,
    pub historico: Option<String>,
    pub numero_emp: Option<String>,
    pub numero_ped: Option<String>,
    pub numero_contrato: Option<String>,
    pub numero_convenio: Option<String>,
    pub dotacao_orcamentaria: Option<String>,
    pub budget: BudgetBreakdown,
    pub nature: ExpenseNature,
    pub elemento: Option<String>,
    pub uo: Option<String>,
    pub nome_unidade_orcamentaria: Option<String>,
    pub ug: Option<String>,
    pub nome_unidade_gestora: Option<String>,
    pub data_emissao: Option<NaiveDateTime>,
    pub data_criacao: Option<NaiveDateTime>,
    pub valor_emp: Option<f64>,
    pub devolucao_gcv: Option<f64>,
    pub valor_emp_devolucao_gcv: Option<f64>,
    pub tipo_empenho: Option<String>,
    pub tipo_despesa: Option<String>,
    pub credor: Option<String>,
    pub nome_credor: Option<String>,
    pub cpf_cnpj_credor: Option<String>,
    pub categoria_credor: Option<String>,
    pub raw_payload: String,
}

impl LedgerRow for CommitmentRow {
    const RECORD_TYPE: RecordType = RecordType::Commitment;

    const COLUMNS: &'static [&'static str] = &[
        "chave",
        "chave_planejamento",
        "regiao",
        "subfuncao_ug",
        "adj",
        "macropolitica",
        "pilar",
        "eixo",
        "politica_decreto",
        "exercicio",
        "situacao",
        "historico",
        "numero_emp",
        "numero_ped",
        "numero_contrato",
        "numero_convenio",
        "dotacao_orcamentaria",
        "funcao",
        "subfuncao",
        "programa_governo",
        "paoe",
        "natureza_despesa",
        "cat_econ",
        "grupo",
        "modalidade",
        "fonte",
        "iduso",
        "elemento",
        "uo",
        "nome_unidade_orcamentaria",
        "ug",
        "nome_unidade_gestora",
        "data_emissao",
        "data_criacao",
        "valor_emp",
        "devolucao_gcv",
        "valor_emp_devolucao_gcv",
        "tipo_empenho",
        "tipo_despesa",
        "credor",
        "nome_credor",
        "cpf_cnpj_credor",
        "categoria_credor",
    ];

    fn values(&self) -> Vec<SqlValue> {
        let mut values = vec![
            SqlValue::text(&self.chave),
            SqlValue::text(&self.chave_planejamento),
        ];
        match &self.planning_segments {
            Some(segments) => values.extend(
                (0..crate::models::LEGACY_PLANNING_COLUMNS.len())
                    .map(|i| SqlValue::text(&segments.get(i).cloned())),
            ),
            None => values.extend(
                std::iter::repeat(SqlValue::Null).take(crate::models::LEGACY_PLANNING_COLUMNS.len()),
            ),
        }
        values.extend([
            SqlValue::integer(self.exercicio),
            SqlValue::text(&self.situacao),
            SqlValue::text(&self.historico),
            SqlValue::text(&self.numero_emp),
            SqlValue::text(&self.numero_ped),
            SqlValue::text(&self.numero_contrato),
            SqlValue::text(&self.numero_convenio),
            SqlValue::text(&self.dotacao_orcamentaria),
            SqlValue::text(&self.budget.funcao),
            SqlValue::text(&self.budget.subfuncao),
            SqlValue::text(&self.budget.programa_governo),
            SqlValue::text(&self.budget.paoe),
            SqlValue::text(&self.budget.natureza_despesa),
            SqlValue::text(&self.nature.cat_econ),
            SqlValue::text(&self.nature.grupo),
            SqlValue::text(&self.nature.modalidade),
            SqlValue::text(&self.budget.fonte),
            SqlValue::text(&self.budget.iduso),
            SqlValue::text(&self.elemento),
            SqlValue::text(&self.uo),
            SqlValue::text(&self.nome_unidade_orcamentaria),
            SqlValue::text(&self.ug),
            SqlValue::text(&self.nome_unidade_gestora),
            SqlValue::timestamp(self.data_emissao),
            SqlValue::timestamp(self.data_criacao),
            SqlValue::real(self.valor_emp),
            SqlValue::real(self.devolucao_gcv),
            SqlValue::real(self.valor_emp_devolucao_gcv),
            SqlValue::text(&self.tipo_empenho),
            SqlValue::text(&self.tipo_despesa),
            SqlValue::text(&self.credor),
            SqlValue::text(&self.nome_credor),
            SqlValue::text(&self.cpf_cnpj_credor),
            SqlValue::text(&self.categoria_credor),
        ]);
        values
    }

    fn raw_payload(&self) -> &str {
        &self.raw_payload
    }
}

/// Payment-order (`nob`) row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentOrderRow {
    pub exercicio: Option<i64>,
    pub numero_nob: Option<String>,
    pub numero_nob_estorno: Option<String>,
    pub numero_liq: Option<String>,
    pub numero_emp: Option<String>,
    pub numero_ped: Option<String>,
    pub valor_nob: Option<f64>,
    pub devolucao_gcv: Option<f64>,
    pub valor_nob_gcv: Option<f64>,
    pub data_nob: Option<NaiveDateTime>,
    pub data_cadastro_nob: Option<NaiveDateTime>,
    pub data_hora_cadastro_liq: Option<NaiveDateTime>,
    pub dotacao_orcamentaria: Option<String>,
    pub nome_fonte_recurso: Option<String>,
    pub ug: Option<String>,
    pub uo: Option<String>,
    pub nome_credor_principal: Option<String>,
    pub cpf_cnpj_credor_principal: Option<String>,
    pub credor: Option<String>,
    pub nome_credor: Option<String>,
    pub cpf_cnpj_credor: Option<String>,
    pub historico_liq: Option<String>,
    /// Commitment of the current fiscal year
    pub empenho_atual: Option<String>,
    /// Commitment carried over from a previous year
    pub empenho_rp: Option<String>,
    pub budget: BudgetBreakdown,
    pub nature: ExpenseNature,
    pub raw_payload: String,
}

impl LedgerRow for PaymentOrderRow {
    const RECORD_TYPE: RecordType = RecordType::PaymentOrder;

    const COLUMNS: &'static [&'static str] = &[
        "exercicio",
        "numero_nob",
        "numero_nob_estorno",
        "numero_liq",
        "numero_emp",
        "numero_ped",
        "valor_nob",
        "devolucao_gcv",
        "valor_nob_gcv",
        "data_nob",
        "data_cadastro_nob",
        "data_hora_cadastro_liq",
        "dotacao_orcamentaria",
        "natureza_despesa",
        "nome_fonte_recurso",
        "ug",
        "uo",
        "nome_credor_principal",
        "cpf_cnpj_credor_principal",
        "credor",
        "nome_credor",
        "cpf_cnpj_credor",
        "historico_liq",
        "empenho_atual",
        "empenho_rp",
        "funcao",
        "subfuncao",
        "programa_governo",
        "paoe",
        "cat_econ",
        "grupo",
        "modalidade",
        "iduso",
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::integer(self.exercicio),
            SqlValue::text(&self.numero_nob),
            SqlValue::text(&self.numero_nob_estorno),
            SqlValue::text(&self.numero_liq),
            SqlValue::text(&self.numero_emp),
            SqlValue::text(&self.numero_ped),
            SqlValue::real(self.valor_nob),
            SqlValue::real(self.devolucao_gcv),
            SqlValue::real(self.valor_nob_gcv),
            SqlValue::timestamp(self.data_nob),
            SqlValue::timestamp(self.data_cadastro_nob),
            SqlValue::timestamp(self.data_hora_cadastro_liq),
            SqlValue::text(&self.dotacao_orcamentaria),
            SqlValue::text(&self.budget.natureza_despesa),
            SqlValue::text(&self.nome_fonte_recurso),
            SqlValue::text(&self.ug),
            SqlValue::text(&self.uo),
            SqlValue::text(&self.nome_credor_principal),
            SqlValue::text(&self.cpf_cnpj_credor_principal),
            SqlValue::text(&self.credor),
            SqlValue::text(&self.nome_credor),
            SqlValue::text(&self.cpf_cnpj_credor),
            SqlValue::text(&self.historico_liq),
            SqlValue::text(&self.empenho_atual),
            SqlValue::text(&self.empenho_rp),
            SqlValue::text(&self.budget.funcao),
            SqlValue::text(&self.budget.subfuncao),
            SqlValue::text(&self.budget.programa_governo),
            SqlValue::text(&self.budget.paoe),
            SqlValue::text(&self.nature.cat_econ),
            SqlValue::text(&self.nature.grupo),
            SqlValue::text(&self.nature.modalidade),
            SqlValue::text(&self.budget.iduso),
        ]
    }

    fn raw_payload(&self) -> &str {
        &self.raw_payload
    }
}

/// `INSERT` statement for one row of `T`, generation columns included
pub fn insert_sql<T: LedgerRow>() -> String {
    let columns: Vec<&str> = T::COLUMNS
        .iter()
        .chain(GENERATION_COLUMNS.iter())
        .copied()
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        T::RECORD_TYPE.table_name(),
        columns.join(", "),
        placeholders
    )
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Integer(i) => query.bind(i),
        SqlValue::Real(f) => query.bind(f),
    }
}

/// Insert one row of the new generation
pub async fn insert_row<T: LedgerRow>(
    conn: &mut SqliteConnection,
    sql: &str,
    row: &T,
    context: &UploadContext,
    written_at: NaiveDateTime,
) -> sqlx::Result<()> {
    let mut query = sqlx::query(sql);
    for value in row.values() {
        query = bind_value(query, value);
    }
    query
        .bind(context.upload_id)
        .bind(row.raw_payload().to_string())
        .bind(written_at.format(TIMESTAMP_FORMAT).to_string())
        .bind(context.file_timestamp.format(TIMESTAMP_FORMAT).to_string())
        .bind(context.user_email.clone())
        .bind(1_i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Mark every active row of the record type inactive; returns rows touched
pub async fn deactivate_active_rows(
    conn: &mut SqliteConnection,
    record_type: RecordType,
) -> sqlx::Result<u64> {
    let sql = format!(
        "UPDATE {} SET ativo = 0 WHERE ativo = 1",
        record_type.table_name()
    );
    let result = sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Active row count of the record type
pub async fn count_active_rows(pool: &sqlx::SqlitePool, record_type: RecordType) -> sqlx::Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE ativo = 1",
        record_type.table_name()
    );
    sqlx::query_scalar(&sql).fetch_one(pool).await
}
