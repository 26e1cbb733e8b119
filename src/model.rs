/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Core data model: object identifiers, versioned objects and the
//! declarative field schema that drives normalization and SQL
//! generation.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A stable, externally assigned identifier for a logical object.
/// Source values may be integers or strings; comparisons follow the
/// source's own rule of "numeric if it parses as one, else string".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    Int(i64),
    Str(String),
}

impl ObjectId {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => ObjectId::Int(n),
            Err(_) => ObjectId::Str(raw.to_string()),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(ObjectId::Int),
            Value::String(s) => Some(ObjectId::parse(s)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ObjectId::Int(n) => Value::from(*n),
            ObjectId::Str(s) => Value::String(s.clone()),
        }
    }

    /// Literal form suitable for embedding in a SQL predicate: numeric
    /// oids are unquoted, string oids are single-quoted.
    pub fn sql_literal(&self) -> String {
        match self {
            ObjectId::Int(n) => n.to_string(),
            ObjectId::Str(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Int(n) => write!(f, "{n}"),
            ObjectId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ObjectId::Int(a), ObjectId::Int(b)) => a.cmp(b),
            (ObjectId::Str(a), ObjectId::Str(b)) => a.cmp(b),
            // Mixed kinds only arise with pathological sources; fall
            // back to string comparison rather than panic.
            (a, b) => a.to_string().cmp(&b.to_string()),
        }
    }
}

/// Declared scalar type for a field schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    Str,
    Int,
    Float,
    Bool,
}

impl TypeTag {
    /// Cast a single scalar value. Null is left untouched by the
    /// caller before this is reached (see `normalize::typecast_scalar`).
    pub fn cast(self, value: Value, field: &str) -> Result<Value> {
        let schema_err = |reason: String| Error::Schema {
            field: field.to_string(),
            reason,
        };
        match self {
            TypeTag::Str => Ok(Value::String(display_scalar(&value))),
            TypeTag::Int => {
                let n = match &value {
                    Value::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().map(|f| f as i64))
                        .ok_or_else(|| schema_err(format!("'{value}' is not an integer"))),
                    Value::String(s) => s
                        .parse::<i64>()
                        .map_err(|_| schema_err(format!("'{s}' is not an integer"))),
                    Value::Bool(b) => Ok(*b as i64),
                    other => Err(schema_err(format!("cannot cast {other} to int"))),
                }?;
                Ok(Value::from(n))
            }
            TypeTag::Float => {
                let n = match &value {
                    Value::Number(n) => n
                        .as_f64()
                        .ok_or_else(|| schema_err(format!("'{value}' is not a float"))),
                    Value::String(s) => s
                        .parse::<f64>()
                        .map_err(|_| schema_err(format!("'{s}' is not a float"))),
                    Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
                    other => Err(schema_err(format!("cannot cast {other} to float"))),
                }?;
                Ok(serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null))
            }
            TypeTag::Bool => {
                let b = match &value {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                    Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
                    other => return Err(schema_err(format!("cannot cast {other} to bool"))),
                };
                Ok(Value::Bool(b))
            }
        }
    }
}

fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// One entry of the declarative field schema: how a field is selected
/// from the source, how its value is shaped once extracted, and which
/// activity-log identifier (if any) carries its change history.
#[derive(Clone)]
pub struct FieldSchema {
    /// Source-side select expression; defaults to `table.<field>` when absent.
    pub select: Option<String>,
    /// Free-form trailing JOIN/filter SQL fragment, appended in FS order.
    pub sql: Option<String>,
    /// Applied scalar- or element-wise after container normalization.
    pub convert: Option<fn(Value) -> Value>,
    /// `true` when the field holds an unordered multiset, materialized
    /// as a sorted list.
    pub container: bool,
    pub ty: Option<TypeTag>,
    /// Activity-log field identifier, when this field is replayable.
    pub what: Option<String>,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            select: None,
            sql: None,
            convert: None,
            container: false,
            ty: None,
            what: None,
        }
    }
}

pub type FieldMap = IndexMap<String, FieldSchema>;

/// A single change-log record: `field` moved from `removed` to `added`
/// at instant `when`. `removed`/`added` are scalars unless `field` is
/// a container, in which case they are lists of added/removed members.
#[derive(Debug, Clone)]
pub struct ChangeLogEntry {
    pub when: f64,
    pub field: String,
    pub removed: Value,
    pub added: Value,
}

/// An object: a field-name to value mapping. Underscore-prefixed keys
/// (`_oid`, `_start`, `_end`, `_hash`, `_corrupted`, `_id`) are control
/// fields; everything else is content subject to hashing and replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Object(pub IndexMap<String, Value>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn oid(&self) -> Result<ObjectId> {
        self.0
            .get("_oid")
            .and_then(ObjectId::from_value)
            .ok_or(Error::MissingOid)
    }

    pub fn start(&self) -> Option<f64> {
        self.0.get("_start").and_then(Value::as_f64)
    }

    pub fn set_start(&mut self, start: f64) {
        self.set("_start", Value::from(start));
    }

    /// `_end` is only "live" when the key is present and `null`; a
    /// missing key means "no validity bound recorded at all" and is
    /// used by the snapshot writer to pick the ingestion path.
    pub fn has_end_field(&self) -> bool {
        self.0.contains_key("_end")
    }

    pub fn end(&self) -> Option<f64> {
        self.0.get("_end").and_then(Value::as_f64)
    }

    pub fn set_end(&mut self, end: Option<f64>) {
        self.set("_end", end.map(Value::from).unwrap_or(Value::Null));
    }

    pub fn id(&self) -> Option<String> {
        self.0.get("_id").and_then(|v| v.as_str()).map(String::from)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.set("_id", Value::String(id.into()));
    }

    pub fn set_hash(&mut self, hash: impl Into<String>) {
        self.set("_hash", Value::String(hash.into()));
    }

    pub fn mark_corrupted(&mut self, field: &str, added: Value) {
        let entry = self
            .0
            .entry("_corrupted".to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = entry {
            map.insert(field.to_string(), added);
        }
    }

    /// The subset of fields fed to `jsonhash`: everything that isn't a
    /// leading-underscore control field.
    pub fn content_fields(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .0
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}
