//! Payload <-> flattened field rows.
//!
//! Scalars are stored as text tagged with their JSON type so they round-trip
//! exactly and can be matched by equality; arrays and objects are stored as
//! JSON text under the `json` tag. Number filters also compare by value.

use dualstore_core::Payload;
use serde_json::Value;

use crate::error::BackendError;

pub(crate) const TYPE_NULL: &str = "null";
pub(crate) const TYPE_BOOL: &str = "bool";
pub(crate) const TYPE_NUMBER: &str = "number";
pub(crate) const TYPE_TEXT: &str = "text";
pub(crate) const TYPE_JSON: &str = "json";

/// One `record_fields` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldRow {
    pub field: String,
    pub value_type: &'static str,
    pub value: Option<String>,
}

pub(crate) fn encode_value(value: &Value) -> Result<(&'static str, Option<String>), BackendError> {
    Ok(match value {
        Value::Null => (TYPE_NULL, None),
        Value::Bool(b) => (TYPE_BOOL, Some(b.to_string())),
        Value::Number(n) => (TYPE_NUMBER, Some(n.to_string())),
        Value::String(s) => (TYPE_TEXT, Some(s.clone())),
        Value::Array(_) | Value::Object(_) => (TYPE_JSON, Some(serde_json::to_string(value)?)),
    })
}

/// Largest magnitude at which every integer still has an exact `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Value used to compare numbers by magnitude, so `36` and `36.0` match.
/// `None` for non-numbers and for values outside the exact `f64` range,
/// which then only match by their stored text.
pub(crate) fn numeric_key(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite() && n.abs() <= MAX_EXACT_INTEGER)
}

pub(crate) fn decode_value(value_type: &str, value: Option<String>) -> Result<Value, BackendError> {
    let require = |v: Option<String>| {
        v.ok_or_else(|| BackendError::Unknown(format!("missing value for {value_type} field")))
    };
    match value_type {
        TYPE_NULL => Ok(Value::Null),
        TYPE_BOOL => Ok(Value::Bool(require(value)? == "true")),
        TYPE_TEXT => Ok(Value::String(require(value)?)),
        TYPE_NUMBER | TYPE_JSON => Ok(serde_json::from_str(&require(value)?)?),
        other => Err(BackendError::Unknown(format!("unknown field type {other:?}"))),
    }
}

pub(crate) fn flatten(payload: &Payload) -> Result<Vec<FieldRow>, BackendError> {
    payload
        .iter()
        .map(|(field, value)| {
            let (value_type, value) = encode_value(value)?;
            Ok(FieldRow { field: field.clone(), value_type, value })
        })
        .collect()
}

pub(crate) fn unflatten(
    rows: impl IntoIterator<Item = (String, String, Option<String>)>,
) -> Result<Payload, BackendError> {
    let mut payload = Payload::new();
    for (field, value_type, value) in rows {
        payload.insert(field, decode_value(&value_type, value)?);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn nested_payload_survives_flattening() {
        let Value::Object(payload) = json!({
            "name": "ada",
            "age": 36,
            "score": 0.25,
            "admin": false,
            "nickname": null,
            "tags": ["math", "engines"],
            "address": {"city": "London", "zip": null}
        }) else {
            unreachable!()
        };

        let rows = flatten(&payload).unwrap();
        assert_eq!(rows.len(), 7);
        let tags = rows.iter().find(|r| r.field == "tags").unwrap();
        assert_eq!(tags.value_type, TYPE_JSON);
        assert_eq!(tags.value.as_deref(), Some(r#"["math","engines"]"#));

        let restored = unflatten(
            rows.into_iter().map(|r| (r.field, r.value_type.to_owned(), r.value)),
        )
        .unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn integral_and_float_forms_share_a_numeric_key() {
        assert_eq!(numeric_key(&json!(36)), numeric_key(&json!(36.0)));
        assert_eq!(numeric_key(&json!(-0.25)), Some(-0.25));
        assert_eq!(numeric_key(&json!("36")), None);
        assert_eq!(numeric_key(&json!(u64::MAX)), None);
    }

    #[test]
    fn unknown_type_tag_is_corruption() {
        let err = decode_value("blob", Some("x".into())).unwrap_err();
        assert!(matches!(err, BackendError::Unknown(_)));
    }
}
