/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Normalizer (NZ): applies the field schema to a raw row, producing
//! an [`Object`]. Matches `generic.py::_prep_objects`/`_unwrap`/
//! `_normalize_container`/`_convert`/`_typecast`/`_type_container`/
//! `_type_single`.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{FieldMap, FieldSchema, Object};
use crate::sql::{RawValue, Row};

/// Run the full four-stage pipeline over one row, then set `_oid`
/// from the configured oid column.
pub fn normalize_row(row: &Row, fields: &FieldMap, oid_column: &str) -> Result<Object> {
    let mut obj = Object::new();
    for (name, schema) in fields {
        let raw = row.get(name).cloned().unwrap_or(RawValue::Null);
        let value = normalize_value(name, schema, unwrap(raw))?;
        obj.set(name.clone(), value);
    }
    let oid_value = obj
        .get(oid_column)
        .cloned()
        .ok_or_else(|| Error::UnknownField(oid_column.to_string()))?;
    obj.set("_oid", oid_value);
    Ok(obj)
}

/// Stages 2-4 of the pipeline (container normalization, conversion,
/// typecasting) applied to an already-unwrapped value. Exposed
/// separately from [`normalize_row`] so idempotence
/// (`normalize(normalize(v)) == normalize(v)`) is directly testable.
pub fn normalize_value(field: &str, schema: &FieldSchema, value: Value) -> Result<Value> {
    let value = normalize_container(field, schema, value)?;
    let value = convert(schema, value);
    typecast(field, schema, value)
}

/// Stage 1: decode opaque blob values as UTF-8, strip surrounding
/// quotes, split on newline into a list; empty becomes null.
fn unwrap(raw: RawValue) -> Value {
    match raw {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(b),
        RawValue::Int(n) => Value::from(n),
        RawValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        RawValue::Text(s) => Value::String(s),
        RawValue::Blob(bytes) => match String::from_utf8(bytes) {
            Ok(s) => {
                let stripped = s.replace('"', "");
                let trimmed = stripped.trim();
                if trimmed.is_empty() {
                    Value::Null
                } else {
                    Value::Array(trimmed.split('\n').map(|s| Value::String(s.to_string())).collect())
                }
            }
            Err(_) => Value::Null,
        },
    }
}

/// Stage 2: reconcile container-ness between FS and the value.
fn normalize_container(field: &str, schema: &FieldSchema, value: Value) -> Result<Value> {
    let is_list = matches!(value, Value::Array(_));
    if schema.container {
        if is_list {
            Ok(value)
        } else if is_falsy(&value) {
            Ok(Value::Null)
        } else {
            Ok(Value::Array(vec![value]))
        }
    } else if is_list {
        Err(Error::Schema {
            field: field.to_string(),
            reason: "expected a scalar, got a list".to_string(),
        })
    } else {
        Ok(value)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Stage 3: apply `f.convert`, scalar- or element-wise.
fn convert(schema: &FieldSchema, value: Value) -> Value {
    let Some(f) = schema.convert else {
        return value;
    };
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(f).collect()),
        other => f(other),
    }
}

/// Stage 4: coerce to `f.type`. Containers cast element-wise and sort
/// ascending; empty/missing containers become `[]`.
fn typecast(field: &str, schema: &FieldSchema, value: Value) -> Result<Value> {
    if schema.container {
        typecast_container(field, schema, value)
    } else {
        typecast_scalar(field, schema, value)
    }
}

fn typecast_scalar(field: &str, schema: &FieldSchema, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.is_empty() => Ok(Value::Null),
        other => match schema.ty {
            None => Ok(other),
            Some(ty) => ty.cast(other, field),
        },
    }
}

fn typecast_container(field: &str, schema: &FieldSchema, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(items) => {
            let mut casted = items
                .into_iter()
                .map(|item| typecast_scalar(field, schema, item))
                .collect::<Result<Vec<_>>>()?;
            sort_values(&mut casted);
            Ok(Value::Array(casted))
        }
        other => Err(Error::Schema {
            field: field.to_string(),
            reason: format!("expected a list, got {other}"),
        }),
    }
}

fn sort_values(items: &mut [Value]) {
    items.sort_by(compare_values);
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypeTag;
    use serde_json::json;

    #[test]
    fn scalar_field_wraps_to_singleton_list_when_container() {
        let schema = FieldSchema {
            container: true,
            ..Default::default()
        };
        let v = normalize_value("tags", &schema, json!("a")).unwrap();
        assert_eq!(v, json!(["a"]));
    }

    #[test]
    fn list_for_non_container_field_is_a_schema_error() {
        let schema = FieldSchema::default();
        assert!(matches!(
            normalize_value("name", &schema, json!(["a", "b"])),
            Err(Error::Schema { .. })
        ));
    }

    #[test]
    fn container_values_are_sorted_ascending() {
        let schema = FieldSchema {
            container: true,
            ty: Some(TypeTag::Str),
            ..Default::default()
        };
        let v = normalize_value("tags", &schema, json!(["b", "a", "c"])).unwrap();
        assert_eq!(v, json!(["a", "b", "c"]));
    }

    #[test]
    fn empty_string_scalar_becomes_null() {
        let schema = FieldSchema::default();
        assert_eq!(normalize_value("name", &schema, json!("")).unwrap(), Value::Null);
    }

    #[test]
    fn missing_container_becomes_empty_list() {
        let schema = FieldSchema {
            container: true,
            ..Default::default()
        };
        assert_eq!(normalize_value("tags", &schema, Value::Null).unwrap(), json!([]));
    }

    #[test]
    fn normalize_is_idempotent() {
        let schema = FieldSchema {
            container: true,
            ty: Some(TypeTag::Int),
            ..Default::default()
        };
        let once = normalize_value("nums", &schema, json!(["3", "1", "2"])).unwrap();
        let twice = normalize_value("nums", &schema, once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn blob_unwraps_to_newline_split_list() {
        let raw = RawValue::Blob(b"\"a\nb\nc\"".to_vec());
        assert_eq!(unwrap(raw), json!(["a", "b", "c"]));
    }

    #[test]
    fn empty_blob_unwraps_to_null() {
        assert_eq!(unwrap(RawValue::Blob(b"\"\"".to_vec())), Value::Null);
    }

    #[test]
    fn blob_with_interior_quotes_and_surrounding_whitespace_unwraps_cleanly() {
        let raw = RawValue::Blob(b"  open\"1\nclosed  ".to_vec());
        assert_eq!(unwrap(raw), json!(["open1", "closed"]));
    }
}
