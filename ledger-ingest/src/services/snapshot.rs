//! Raw-payload snapshot of a record before any transformation

use crate::error::IngestResult;
use crate::models::RawRecord;
use serde_json::{Map, Value};

/// JSON object of the record's fields in arrival order
///
/// Non-finite numbers become `null`; dates and timestamps are ISO-8601
/// text. A repeated field name keeps its first position and its last value.
pub fn snapshot_value(record: &RawRecord) -> Value {
    let mut object = Map::with_capacity(record.len());
    for field in record.fields() {
        object.insert(field.name.clone(), field.value.to_snapshot_json());
    }
    Value::Object(object)
}

/// Serialized [`snapshot_value`]
pub fn snapshot_json(record: &RawRecord) -> IngestResult<String> {
    Ok(serde_json::to_string(&snapshot_value(record))?)
}
