//! Ledger rows as they arrive and the per-batch context around them

use crate::normalize::normalize_field_name;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// One cell of a raw ledger row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Empty,
    Text(String),
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    /// Cell from a parsed JSON value; nested values keep their JSON text
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Empty,
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Bool(b) => FieldValue::Text(b.to_string()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => n.as_f64().map_or(FieldValue::Empty, FieldValue::Number),
            },
            other => FieldValue::Text(other.to_string()),
        }
    }

    /// Textual rendering; `None` for empty cells and non-finite numbers
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            FieldValue::Empty => None,
            FieldValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            FieldValue::Integer(i) => Some(Cow::Owned(i.to_string())),
            FieldValue::Number(n) if !n.is_finite() => None,
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(Cow::Owned(format!("{}", *n as i64)))
            }
            FieldValue::Number(n) => Some(Cow::Owned(n.to_string())),
            FieldValue::Date(d) => Some(Cow::Owned(d.format("%Y-%m-%d").to_string())),
            FieldValue::DateTime(dt) => Some(Cow::Owned(dt.format("%Y-%m-%dT%H:%M:%S").to_string())),
        }
    }

    /// Null-safe JSON for the raw snapshot: non-finite numbers become
    /// `null`, dates are ISO-8601 text
    pub fn to_snapshot_json(&self) -> Value {
        match self {
            FieldValue::Empty => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }
}

/// Named cell; `key` is the snake-case lookup name
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    pub name: String,
    pub key: String,
    pub value: FieldValue,
}

/// One ledger row as ingested, field order preserved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<RawField>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, FieldValue)>,
        N: Into<String>,
    {
        let mut record = Self::new();
        for (name, value) in pairs {
            record.push(name, value);
        }
        record
    }

    /// Row from a JSON object; keys keep document order
    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        Self::from_pairs(object.iter().map(|(k, v)| (k.clone(), FieldValue::from_json(v))))
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        let key = normalize_field_name(&name);
        self.fields.push(RawField { name, key, value });
    }

    pub fn fields(&self) -> &[RawField] {
        &self.fields
    }

    /// First field whose lookup name is one of `aliases`
    pub fn get(&self, aliases: &[&str]) -> Option<&FieldValue> {
        aliases
            .iter()
            .find_map(|alias| self.fields.iter().find(|f| f.key == *alias))
            .map(|f| &f.value)
    }

    pub fn has_field(&self, aliases: &[&str]) -> bool {
        self.get(aliases).is_some()
    }

    /// Trimmed non-empty text of the first matching field
    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        self.get(aliases)
            .and_then(FieldValue::as_text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ledger record family; each has its own table and generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// Commitments (`emp`)
    #[serde(rename = "emp")]
    Commitment,
    /// Payment orders (`nob`)
    #[serde(rename = "nob")]
    PaymentOrder,
}

impl RecordType {
    pub fn table_name(&self) -> &'static str {
        match self {
            RecordType::Commitment => "emp",
            RecordType::PaymentOrder => "nob",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.table_name()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emp" | "commitment" => Ok(RecordType::Commitment),
            "nob" | "payment-order" | "payment_order" => Ok(RecordType::PaymentOrder),
            other => Err(format!("unknown record type '{}' (expected emp or nob)", other)),
        }
    }
}

/// First fiscal year filed under the four-segment key scheme
pub const CURRENT_SCHEME_FIRST_YEAR: i32 = 2026;

/// Planning columns filled from a legacy key, in segment order
pub const LEGACY_PLANNING_COLUMNS: [&str; 7] = [
    "regiao",
    "subfuncao_ug",
    "adj",
    "macropolitica",
    "pilar",
    "eixo",
    "politica_decreto",
];

/// Planning-key layout, chosen per batch by fiscal year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// Seven segments, stored in `chave_planejamento` plus planning columns
    Legacy,
    /// Four segments, stored in `chave`; planning columns left NULL
    Current,
}

impl KeyScheme {
    pub fn for_fiscal_year(year: Option<i32>) -> Self {
        match year {
            Some(y) if y >= CURRENT_SCHEME_FIRST_YEAR => KeyScheme::Current,
            _ => KeyScheme::Legacy,
        }
    }

    /// Segment count W
    pub fn segment_width(&self) -> usize {
        match self {
            KeyScheme::Legacy => LEGACY_PLANNING_COLUMNS.len(),
            KeyScheme::Current => 4,
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            KeyScheme::Legacy => "chave_planejamento",
            KeyScheme::Current => "chave",
        }
    }
}

/// Who uploaded what, attached to every row of a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadContext {
    pub upload_id: i64,
    pub user_email: String,
    /// Timestamp of the source file
    pub file_timestamp: NaiveDateTime,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub record_type: RecordType,
    pub table: String,
    pub upload_id: i64,
    pub rows_written: usize,
    pub chunk_sizes: Vec<usize>,
}
