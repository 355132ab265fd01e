//! Raw remote records and the reserved keys the engine reads from them.

use crate::{DISABLED_FIELD, ID_FIELD, REFERENCE_ONLY_FIELD, UUID_FIELD};
use serde_json::Value as JsonValue;

///
/// RawRecord
///
/// Untyped field-name → value mapping received from the remote source.
/// Values are scalars, nested records, or arrays of nested records.
///

pub type RawRecord = serde_json::Map<String, JsonValue>;

/// Authority-assigned identity of a record.
///
/// Only JSON integers count; anything else is "no usable id".
#[must_use]
pub fn record_id(record: &RawRecord) -> Option<i64> {
    record.get(ID_FIELD).and_then(JsonValue::as_i64)
}

#[must_use]
pub fn record_uuid(record: &RawRecord) -> Option<&str> {
    record.get(UUID_FIELD).and_then(JsonValue::as_str)
}

/// True only for an explicit boolean `true`.
#[must_use]
pub fn is_disabled(record: &RawRecord) -> bool {
    flag(record, DISABLED_FIELD)
}

/// True when the record is a stub pointer whose fields must not be copied.
#[must_use]
pub fn is_reference_only(record: &RawRecord) -> bool {
    flag(record, REFERENCE_ONLY_FIELD)
}

fn flag(record: &RawRecord, key: &str) -> bool {
    record.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
}

/// Decode an array of nested records.
///
/// Returns `None` unless `value` is an array whose every element is an
/// object.
#[must_use]
pub fn record_array(value: &JsonValue) -> Option<Vec<&RawRecord>> {
    value
        .as_array()?
        .iter()
        .map(JsonValue::as_object)
        .collect()
}

/// Look up `section` on a top-level payload object.
#[must_use]
pub fn payload_section<'a>(payload: &'a JsonValue, section: &str) -> Option<&'a JsonValue> {
    payload.as_object()?.get(section)
}
