use crate::{
    model::{AttributeModel, ScalarKind},
    value::Value,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use thiserror::Error as ThisError;

///
/// CoercionError
///
/// Raw payloads that cannot be stored without corrupting the model.
/// Everything else that fails to convert is stored as `Value::Null`.
///

#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum CoercionError {
    #[error("date attribute '{field}' expects milliseconds since epoch, got {found}")]
    NonNumericDate { field: String, found: String },

    #[error("date attribute '{field}' is outside the representable range: {millis}ms")]
    DateOutOfRange { field: String, millis: f64 },
}

/// Convert one present raw payload value into the attribute's declared kind.
pub fn coerce(attribute: &AttributeModel, raw: &JsonValue) -> Result<Value, CoercionError> {
    let value = match attribute.kind {
        ScalarKind::Int16 | ScalarKind::Int32 | ScalarKind::Int64 => coerce_int(raw),
        ScalarKind::Decimal => coerce_decimal(raw),
        ScalarKind::Double => raw.as_f64().map_or(Value::Null, Value::Float64),
        #[expect(clippy::cast_possible_truncation)]
        ScalarKind::Float => raw
            .as_f64()
            .map_or(Value::Null, |v| Value::Float32(v as f32)),
        ScalarKind::String => raw
            .as_str()
            .map_or(Value::Null, |v| Value::Text(v.to_string())),
        ScalarKind::Boolean => raw.as_bool().map_or(Value::Null, Value::Bool),
        ScalarKind::Date => return coerce_date(&attribute.name, raw),
        ScalarKind::Binary => coerce_binary(raw),
        ScalarKind::Transformable | ScalarKind::Undefined => Value::Json(raw.clone()),
    };

    Ok(value)
}

#[expect(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn coerce_int(raw: &JsonValue) -> Value {
    if let Some(v) = raw.as_i64() {
        return Value::Int(v);
    }

    // integral floats such as `12.0` still name an integer
    match raw.as_f64() {
        Some(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
            Value::Int(v as i64)
        }
        _ => Value::Null,
    }
}

fn coerce_decimal(raw: &JsonValue) -> Value {
    let text = match raw {
        // numbers keep their source text, so no digits are lost to f64
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        _ => return Value::Null,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_or(Value::Null, Value::Decimal)
}

#[expect(clippy::cast_possible_truncation)]
fn coerce_date(field: &str, raw: &JsonValue) -> Result<Value, CoercionError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let Some(millis) = raw.as_f64() else {
        return Err(CoercionError::NonNumericDate {
            field: field.to_string(),
            found: raw.to_string(),
        });
    };

    let micros = (millis * 1_000.0).round();
    let out_of_range = || CoercionError::DateOutOfRange {
        field: field.to_string(),
        millis,
    };
    if !micros.is_finite() {
        return Err(out_of_range());
    }

    DateTime::from_timestamp_micros(micros as i64)
        .map(Value::Timestamp)
        .ok_or_else(out_of_range)
}

fn coerce_binary(raw: &JsonValue) -> Value {
    match raw {
        JsonValue::String(s) => STANDARD.decode(s).map_or(Value::Null, Value::Blob),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<_>>>()
            .map_or(Value::Null, Value::Blob),
        _ => Value::Null,
    }
}
