use std::sync::Arc;

use serde_json::json;
use serde_json::Value;

use crate::DmlEvent;

/// Change record of `table` keyed by column `id`.
pub(crate) fn dml_event(
    table: &str,
    id: impl Into<Value>,
) -> DmlEvent {
    serde_json::from_value(json!({
        "tableName": table,
        "database": "test",
        "pkNames": ["id"],
        "type": "INSERT",
        "data": {"id": id.into()},
    }))
    .unwrap()
}

pub(crate) fn shared_event(
    table: &str,
    id: impl Into<Value>,
) -> Arc<DmlEvent> {
    Arc::new(dml_event(table, id))
}

/// Change record with a composite key, one column per value.
pub(crate) fn union_dml_event(
    table: &str,
    values: Vec<Value>,
) -> Arc<DmlEvent> {
    let pk_names: Vec<String> = (0..values.len()).map(|i| format!("k{i}")).collect();
    let data: serde_json::Map<String, Value> = pk_names.iter().cloned().zip(values).collect();
    Arc::new(
        serde_json::from_value(json!({
            "tableName": table,
            "pkNames": pk_names,
            "type": "UPDATE",
            "data": data,
        }))
        .unwrap(),
    )
}

/// Wire lines of one record of the event stream protocol.
pub(crate) fn record_lines(
    message_id: i64,
    event_type: &str,
    dml: &DmlEvent,
) -> Vec<String> {
    vec![
        format!("id:{message_id}"),
        format!("event:{event_type}"),
        format!("data:{}", serde_json::to_string(dml).unwrap()),
        String::new(),
    ]
}
