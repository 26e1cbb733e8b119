/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Activity Replay (AR): reconstructs the full version history of an
//! object by walking its change-log backwards from the current
//! snapshot. Matches `generic.py::_activity_import_doc` and
//! `_activity_backwards`.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{ChangeLogEntry, FieldMap, Object, ObjectId};

/// A source of per-oid change-log history, matching
/// `generic.py::Generic.activity_get`: "a dictionary of
/// `id: [(when, field, removed, added)]` key:value pairs". Left
/// unimplemented by the base source in the original -- concrete
/// sources provide it against whatever audit/change-log table they
/// carry.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn activity_get(&self, oids: &[ObjectId]) -> Result<HashMap<ObjectId, Vec<ChangeLogEntry>>>;
}

/// An inconsistency discovered while replaying backwards: the
/// backward transform's assumption about the field's prior value
/// didn't hold. Non-fatal -- recorded here and on the object's
/// `_corrupted` map, replay continues as if consistent.
#[derive(Debug, Clone)]
pub struct Inconsistency {
    pub oid: ObjectId,
    pub field: String,
    pub removed: Value,
    pub added: Value,
    pub last_val: Value,
    pub when: f64,
}

impl Inconsistency {
    /// Human-readable line for the append-only inconsistency log
    /// (spec.md §6's format).
    pub fn format_line(&self) -> String {
        format!(
            "{} {}: {}-> {} has {}; ({}-> {} has {}) ... on {}",
            self.oid,
            self.field,
            self.removed,
            self.added,
            self.last_val,
            type_name(&self.removed),
            type_name(&self.added),
            type_name(&self.last_val),
            self.when
        )
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Reconstruct the full version history of `current` from its
/// change-log, oldest version first. `creation_field`, when
/// configured, backdates the oldest version's `_start` past the
/// earliest replayed boundary if the source's own creation timestamp
/// predates it.
pub fn replay(
    current: &Object,
    log: &[ChangeLogEntry],
    fields: &FieldMap,
    creation_field: Option<&str>,
) -> Result<(Vec<Object>, Vec<Inconsistency>)> {
    let start = current.start().ok_or_else(|| Error::Schema {
        field: "_start".to_string(),
        reason: "missing on the current object".to_string(),
    })?;

    let mut entries: Vec<&ChangeLogEntry> = log
        .iter()
        .filter(|e| e.when < start && current.contains(&e.field))
        .collect();
    entries.sort_by(|a, b| b.when.partial_cmp(&a.when).unwrap_or(Ordering::Equal));

    let mut stack: Vec<Object> = vec![current.clone()];
    let mut inconsistencies = Vec::new();

    for entry in entries {
        let mut top = stack.pop().expect("stack seeded with the current version");
        let boundary = top.start();
        if boundary == Some(entry.when) {
            // A previous entry at this same instant already opened a
            // boundary here (several fields changed together);
            // apply this field's backward transform to that same
            // version instead of splitting again.
            apply_field_transform(&mut top, entry, fields, &mut inconsistencies)?;
            stack.push(top);
        } else {
            // Split off an older version covering [when, boundary):
            // boundary is `top`'s own start, preserving contiguity
            // (`older.end == top.start`). `top` itself is pushed back
            // unchanged.
            let mut older = top.clone();
            older.set_start(entry.when);
            older.set_end(boundary);
            apply_field_transform(&mut older, entry, fields, &mut inconsistencies)?;
            stack.push(top);
            stack.push(older);
        }
    }

    let stack_len = stack.len();
    if let Some(cfield) = creation_field {
        if let Some(oldest) = stack.last_mut() {
            match oldest.get(cfield).and_then(Value::as_f64) {
                Some(creation_ts) => {
                    let oldest_start = oldest.start().unwrap_or(creation_ts);
                    if creation_ts < oldest_start {
                        oldest.set_start(creation_ts);
                    } else if stack_len == 1 {
                        return Ok((Vec::new(), inconsistencies));
                    }
                }
                None => {
                    log::warn!(
                        "creation-time field '{cfield}' missing on oldest version; keeping object as-is"
                    );
                }
            }
        }
    }

    stack.reverse();
    Ok((stack, inconsistencies))
}

/// Apply one change-log entry's backward transform to `doc` in place,
/// recording an [`Inconsistency`] (and marking `doc._corrupted`) when
/// the field's current value doesn't match what the log claims was
/// added.
fn apply_field_transform(
    doc: &mut Object,
    entry: &ChangeLogEntry,
    fields: &FieldMap,
    inconsistencies: &mut Vec<Inconsistency>,
) -> Result<()> {
    let container = fields.get(&entry.field).map(|s| s.container).unwrap_or(false);
    let current_val = doc.get(&entry.field).cloned();
    let last_val = current_val.clone().unwrap_or(Value::Null);
    let (new_val, inconsistent) = backwards_transform(current_val, &entry.removed, &entry.added, container);
    if inconsistent {
        inconsistencies.push(Inconsistency {
            oid: doc.oid()?,
            field: entry.field.clone(),
            removed: entry.removed.clone(),
            added: entry.added.clone(),
            last_val,
            when: entry.when,
        });
        doc.mark_corrupted(&entry.field, entry.added.clone());
    }
    doc.set(entry.field.clone(), new_val);
    Ok(())
}

/// For container fields: remove each member of `added` from the
/// current value (flagging an inconsistency if absent), then extend
/// with `removed`. For scalar fields: the value is inconsistent if it
/// doesn't already equal `added`, then becomes `removed` regardless.
fn backwards_transform(
    current: Option<Value>,
    removed: &Value,
    added: &Value,
    container: bool,
) -> (Value, bool) {
    if container {
        let mut val: Vec<Value> = match current {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let mut inconsistent = false;
        for a in as_list(added) {
            match val.iter().position(|x| *x == a) {
                Some(pos) => {
                    val.remove(pos);
                }
                None => inconsistent = true,
            }
        }
        val.extend(as_list(removed));
        (Value::Array(val), inconsistent)
    } else {
        let inconsistent = current.as_ref() != Some(added);
        (removed.clone(), inconsistent)
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// In-memory [`ActivityLog`], in the same spirit as
/// `sql::memory::MemorySource`: a fixed `oid -> entries` map, no
/// driver behind it.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    entries: HashMap<ObjectId, Vec<ChangeLogEntry>>,
}

impl MemoryActivityLog {
    pub fn new(entries: HashMap<ObjectId, Vec<ChangeLogEntry>>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn activity_get(&self, oids: &[ObjectId]) -> Result<HashMap<ObjectId, Vec<ChangeLogEntry>>> {
        Ok(oids
            .iter()
            .map(|oid| (oid.clone(), self.entries.get(oid).cloned().unwrap_or_default()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    fn current(oid: i64, start: f64, fields: &[(&str, Value)]) -> Object {
        let mut o = Object::new();
        o.set("_oid", json!(oid));
        o.set_start(start);
        o.set_end(None);
        for (k, v) in fields {
            o.set(*k, v.clone());
        }
        o
    }

    fn entry(when: f64, field: &str, removed: Value, added: Value) -> ChangeLogEntry {
        ChangeLogEntry {
            when,
            field: field.to_string(),
            removed,
            added,
        }
    }

    // S3 - backwards replay on a scalar field.
    #[test]
    fn scalar_replay_reconstructs_prior_status() {
        let d = current(1, 1000.0, &[("status", json!("closed"))]);
        let log = vec![entry(500.0, "status", json!("open"), json!("closed"))];
        let (versions, inconsistencies) = replay(&d, &log, &FieldMap::new(), None).unwrap();
        assert!(inconsistencies.is_empty());
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].get("status"), Some(&json!("open")));
        assert_eq!(versions[0].start(), Some(500.0));
        assert_eq!(versions[0].end(), Some(1000.0));
        assert_eq!(versions[1].get("status"), Some(&json!("closed")));
        assert_eq!(versions[1].start(), Some(1000.0));
        assert_eq!(versions[1].end(), None);
    }

    // S4 - backwards replay on a container field with an inconsistency.
    #[test]
    fn container_replay_flags_inconsistency_and_corrupts() {
        let d = current(2, 2000.0, &[("tags", json!(["a", "b"]))]);
        let mut fields = FieldMap::new();
        fields.insert(
            "tags".to_string(),
            crate::model::FieldSchema {
                container: true,
                ..Default::default()
            },
        );
        let log = vec![entry(1000.0, "tags", json!(["x"]), json!(["c"]))];
        let (versions, inconsistencies) = replay(&d, &log, &fields, None).unwrap();
        assert_eq!(inconsistencies.len(), 1);
        assert_eq!(inconsistencies[0].field, "tags");
        let historical = &versions[0];
        let mut tags = historical.get("tags").unwrap().as_array().unwrap().clone();
        tags.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        assert_eq!(tags, vec![json!("a"), json!("b"), json!("x")]);
        assert_eq!(
            historical.get("_corrupted").unwrap(),
            &json!({"tags": ["c"]})
        );
    }

    // S6 - creation-time backdate.
    #[test]
    fn creation_time_backdates_the_only_version() {
        let d = current(3, 900.0, &[("created", json!(400.0))]);
        let (versions, _) = replay(&d, &[], &FieldMap::new(), Some("created")).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].start(), Some(400.0));
    }

    #[test]
    fn unchanged_single_version_with_creation_time_not_earlier_is_dropped() {
        let d = current(3, 900.0, &[("created", json!(900.0))]);
        let (versions, _) = replay(&d, &[], &FieldMap::new(), Some("created")).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn consistent_replay_is_idempotent() {
        let d = current(1, 1000.0, &[("status", json!("closed"))]);
        let log = vec![entry(500.0, "status", json!("open"), json!("closed"))];
        let (first, _) = replay(&d, &log, &FieldMap::new(), None).unwrap();
        let (second, _) = replay(&d, &log, &FieldMap::new(), None).unwrap();
        assert_eq!(first, second);
    }
}
