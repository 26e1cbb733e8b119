/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Integration tests exercising the full `BD -> NZ -> AR -> SW`
//! pipeline against the in-memory `Store`/`SqlSource`/`ActivityLog`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use bitempo::batch;
use bitempo::config::{IngestConfig, SourceConfig};
use bitempo::inconsistency_log::MemoryInconsistencyLog;
use bitempo::model::{ChangeLogEntry, FieldMap, FieldSchema, ObjectId};
use bitempo::replay::MemoryActivityLog;
use bitempo::sql::memory::MemorySource;
use bitempo::sql::{RawValue, Row};
use bitempo::store::memory::MemoryStore;

fn loc() -> bitempo::config::SourceLocation {
    SourceConfig {
        db: Some("d".into()),
        table: Some("issues".into()),
        oid: Some("id".into()),
        ..Default::default()
    }
    .location()
    .unwrap()
}

fn fields() -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("id".to_string(), FieldSchema::default());
    fields.insert("status".to_string(), FieldSchema::default());
    fields
}

fn ingest() -> IngestConfig {
    IngestConfig {
        batch_size: 1000,
        worker_batch_size: 5000,
        retries: 1,
        workers: 2,
        cfield: None,
        delta_new_ids: true,
        delta_mtime: vec![],
        parse_timestamp: true,
        force: false,
        force_oids: vec![],
    }
}

fn row(id: i64, status: &str) -> Row {
    let mut r = Row::new();
    r.insert("id".to_string(), RawValue::Int(id));
    r.insert("status".to_string(), RawValue::Text(status.to_string()));
    r
}

/// An initial current-value ingest inserts one live version per oid,
/// and a second ingest with unchanged rows is a no-op (S1/S2).
#[tokio::test]
async fn current_value_ingest_then_noop_reingest() {
    let source = Arc::new(MemorySource::new("generic", vec![row(1, "open"), row(2, "open")]));
    let store = Arc::new(MemoryStore::new());

    let first = batch::get_current(
        source.clone(),
        store.clone(),
        loc(),
        Arc::new(fields()),
        &ingest(),
        None,
        None,
        100.0,
        true,
    )
    .await
    .unwrap();
    assert_eq!(first.snapshot.inserted, 2);
    assert_eq!(first.failed_batches, 0);
    assert_eq!(store.documents("issues").len(), 2);

    let second = batch::get_current(
        source,
        store.clone(),
        loc(),
        Arc::new(fields()),
        &ingest(),
        None,
        None,
        200.0,
        true,
    )
    .await
    .unwrap();
    assert_eq!(second.snapshot.inserted, 0);
    assert_eq!(second.snapshot.closed, 0);
    assert_eq!(store.documents("issues").len(), 2);
}

/// A changed field on re-ingest closes the live version and opens a
/// new one, leaving the full history intact (S1).
#[tokio::test]
async fn current_value_ingest_versions_a_changed_field() {
    let store = Arc::new(MemoryStore::new());
    let first_source = Arc::new(MemorySource::new("generic", vec![row(1, "open")]));
    batch::get_current(
        first_source,
        store.clone(),
        loc(),
        Arc::new(fields()),
        &ingest(),
        None,
        None,
        100.0,
        true,
    )
    .await
    .unwrap();

    let second_source = Arc::new(MemorySource::new("generic", vec![row(1, "closed")]));
    batch::get_current(
        second_source,
        store.clone(),
        loc(),
        Arc::new(fields()),
        &ingest(),
        None,
        None,
        200.0,
        true,
    )
    .await
    .unwrap();

    let mut docs = store.documents("issues");
    docs.sort_by(|a, b| a.object.start().partial_cmp(&b.object.start()).unwrap());
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].object.get("status"), Some(&json!("open")));
    assert_eq!(docs[0].object.end(), Some(200.0));
    assert_eq!(docs[1].object.get("status"), Some(&json!("closed")));
    assert_eq!(docs[1].object.end(), None);
}

/// Full-history ingestion reconstructs every version from the change
/// log in one pass and records no inconsistency when the log is
/// internally consistent (S3).
#[tokio::test]
async fn full_history_ingest_reconstructs_past_versions() {
    let source = Arc::new(MemorySource::new("generic", vec![row(1, "closed")]));
    let store = Arc::new(MemoryStore::new());

    let mut entries = HashMap::new();
    entries.insert(
        ObjectId::Int(1),
        vec![ChangeLogEntry {
            when: 500.0,
            field: "status".to_string(),
            removed: json!("open"),
            added: json!("closed"),
        }],
    );
    let activity_log = Arc::new(MemoryActivityLog::new(entries));
    let inconsistency_log = Arc::new(MemoryInconsistencyLog::new());

    let outcome = batch::get_full_history(
        source,
        store.clone(),
        loc(),
        Arc::new(fields()),
        &ingest(),
        None,
        None,
        1000.0,
        activity_log,
        inconsistency_log,
        false,
        true,
    )
    .await
    .unwrap();

    assert!(outcome.inconsistencies.is_empty());
    let mut docs = store.documents("issues");
    docs.sort_by(|a, b| a.object.start().partial_cmp(&b.object.start()).unwrap());
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].object.get("status"), Some(&json!("open")));
    assert_eq!(docs[0].object.start(), Some(500.0));
    assert_eq!(docs[0].object.end(), Some(1000.0));
    assert_eq!(docs[1].object.get("status"), Some(&json!("closed")));
    assert_eq!(docs[1].object.start(), Some(1000.0));
    assert_eq!(docs[1].object.end(), None);
}

/// An inconsistent change log (prior value claimed by the log doesn't
/// match the reconstructed value) is recorded but doesn't fail the run.
#[tokio::test]
async fn full_history_ingest_flags_inconsistency_without_failing() {
    let source = Arc::new(MemorySource::new("generic", vec![row(1, "closed")]));
    let store = Arc::new(MemoryStore::new());

    let mut entries = HashMap::new();
    entries.insert(
        ObjectId::Int(1),
        vec![ChangeLogEntry {
            when: 500.0,
            field: "status".to_string(),
            removed: json!("open"),
            added: json!("in-progress"),
        }],
    );
    let activity_log = Arc::new(MemoryActivityLog::new(entries));
    let inconsistency_log = Arc::new(MemoryInconsistencyLog::new());

    let outcome = batch::get_full_history(
        source,
        store.clone(),
        loc(),
        Arc::new(fields()),
        &ingest(),
        None,
        None,
        1000.0,
        activity_log,
        inconsistency_log,
        false,
        true,
    )
    .await
    .unwrap();

    assert_eq!(outcome.inconsistencies.len(), 1);
    assert_eq!(outcome.inconsistencies[0].field, "status");
    assert_eq!(outcome.failed_batches, 0);
}
