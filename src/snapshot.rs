/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Snapshot Writer (SW): the only component allowed to write to the
//! store. Matches `etl_api.py::_prep_object`/`_save_and_snapshot`/
//! `_save_no_snapshot`/`_save_objects`. The bulk-insert chunk size of
//! 1000 mirrors `dbdaemon::daemon::updates::UpdateGuard::run`'s
//! `CHUNK_SIZE`.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::hash::jsonhash;
use crate::model::{Object, ObjectId};
use crate::store::{SortDir, Store, StoredDoc};

pub const CHUNK_SIZE: usize = 1000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub closed: usize,
    pub inserted: usize,
    pub overwritten: usize,
}

impl SnapshotOutcome {
    pub(crate) fn merge(&mut self, other: SnapshotOutcome) {
        self.closed += other.closed;
        self.inserted += other.inserted;
        self.overwritten += other.overwritten;
    }
}

/// Prepare and persist `objects`, dispatching each to the snapshot or
/// no-snapshot path by presence of `_end`.
pub async fn write(store: &dyn Store, table: &str, objects: Vec<Object>, now: f64) -> Result<SnapshotOutcome> {
    let prepared = objects
        .into_iter()
        .map(|o| prep_object(o, now))
        .collect::<Result<Vec<_>>>()?;
    let (snapshot, no_snapshot): (Vec<_>, Vec<_>) =
        prepared.into_iter().partition(|o| !o.has_end_field());

    let mut outcome = write_snapshot(store, table, snapshot).await?;
    outcome.merge(write_no_snapshot(store, table, no_snapshot).await?);
    Ok(outcome)
}

/// Stamp `objects` the same way [`write`] would, without persisting
/// them -- the `flush=false` path, which accumulates prepared objects
/// for the caller to hold onto instead of writing them to the store.
pub fn prepare(objects: Vec<Object>, now: f64) -> Result<Vec<Object>> {
    objects.into_iter().map(|o| prep_object(o, now)).collect()
}

/// Stamp an object before it's written: compute `_hash` over its
/// content fields, rename `_mtime` to `_start` if present, default
/// `_start` to `now`. `_start` must end up numeric and `_oid` must be
/// present.
fn prep_object(mut object: Object, now: f64) -> Result<Object> {
    let hash = jsonhash(&object.content_fields());
    object.set_hash(hash);
    if let Some(mtime) = object.0.shift_remove("_mtime") {
        object.0.insert("_start".to_string(), mtime);
    }
    if !object.contains("_start") {
        object.set_start(now);
    }
    let oid = object.oid()?;
    if object.start().is_none() {
        return Err(Error::NonNumericStart(oid));
    }
    Ok(object)
}

/// Snapshot path: diff against the live version, close-and-replace on
/// change, no-op otherwise.
async fn write_snapshot(store: &dyn Store, table: &str, objects: Vec<Object>) -> Result<SnapshotOutcome> {
    let mut outcome = SnapshotOutcome::default();
    if objects.is_empty() {
        return Ok(outcome);
    }

    store
        .ensure_index(
            table,
            &[("_oid".to_string(), SortDir::Asc), ("_end".to_string(), SortDir::Asc)],
        )
        .await?;
    store
        .ensure_index(
            table,
            &[("_oid".to_string(), SortDir::Asc), ("_start".to_string(), SortDir::Asc)],
        )
        .await?;

    let mut docmap: IndexMap<ObjectId, Object> = IndexMap::new();
    for object in objects {
        docmap.insert(object.oid()?, object);
    }

    let oids: Vec<ObjectId> = docmap.keys().cloned().collect();
    let live = store.find_live(table, &oids).await?;

    let mut grouped: HashMap<ObjectId, Vec<StoredDoc>> = HashMap::new();
    for doc in live {
        if let Ok(oid) = doc.object.oid() {
            grouped.entry(oid).or_default().push(doc);
        }
    }

    for (oid, mut docs) in grouped {
        // Deterministic "first" pick when multiple live versions
        // exist for one oid -- the repair policy is explicitly left
        // undefined by the source; we only warn and skip the rest.
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        if docs.len() > 1 {
            log::warn!(
                "multiple live versions for oid {oid} in table '{table}'; \
                 processing one and skipping {} extra(s)",
                docs.len() - 1
            );
        }
        let t = docs.remove(0);
        let Some(update) = docmap.get(&oid) else {
            continue;
        };
        if semantically_differs(update, &t.object) {
            let close_at = update.start().unwrap_or_else(|| t.object.start().unwrap_or(0.0));
            store.update_end(table, &t.id, close_at).await?;
            outcome.closed += 1;
            let merged = merge_preserving_old(&t.object, update);
            docmap.insert(oid, merged);
        } else {
            docmap.shift_remove(&oid);
        }
    }

    let mut survivors: Vec<Object> = docmap.into_values().collect();
    for object in survivors.iter_mut() {
        object.set_id(store.mint_id());
        object.set_end(None);
    }
    for chunk in survivors.chunks(CHUNK_SIZE) {
        store.insert_many(table, chunk.to_vec()).await?;
    }
    outcome.inserted += survivors.len();
    Ok(outcome)
}

/// No-snapshot path: objects already carry explicit validity bounds,
/// so they either overwrite an existing document by `_id` or are
/// freshly inserted.
async fn write_no_snapshot(store: &dyn Store, table: &str, objects: Vec<Object>) -> Result<SnapshotOutcome> {
    let mut outcome = SnapshotOutcome::default();
    let mut to_insert = Vec::new();
    for mut object in objects {
        match object.id() {
            Some(id) => {
                store.overwrite(table, &id, object).await?;
                outcome.overwritten += 1;
            }
            None => {
                object.set_id(store.mint_id());
                to_insert.push(object);
            }
        }
    }
    for chunk in to_insert.chunks(CHUNK_SIZE) {
        store.insert_many(table, chunk.to_vec()).await?;
    }
    outcome.inserted += to_insert.len();
    Ok(outcome)
}

/// Only content (non-underscore) fields participate in the diff --
/// `_start`/`_hash`/`_id` always change on re-ingest and would
/// otherwise force a spurious new version on every run.
fn semantically_differs(update: &Object, live: &Object) -> bool {
    update
        .0
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .any(|(k, v)| live.get(k) != Some(v))
}

fn merge_preserving_old(old: &Object, update: &Object) -> Object {
    let mut merged = old.clone();
    for (k, v) in update.0.iter() {
        merged.set(k.clone(), v.clone());
    }
    merged
}
