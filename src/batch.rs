/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Batch Driver (BD): the only component that owns oid-batch
//! partitioning and worker fan-out. Matches
//! `generic.py::get_objects`/`get_full_history`/`_get_objects`/
//! `_activity_get_objects`, and the worker-task pattern from
//! `dbdaemon/src/backend.rs::handle_conn`'s `tokio::spawn` +
//! bounded-concurrency style, generalized from one spawn per
//! connection to one spawn per worker batch.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{IngestConfig, SourceLocation};
use crate::engine_cache::{EngineCache, EngineKey};
use crate::error::Result;
use crate::inconsistency_log::InconsistencySink;
use crate::model::{FieldMap, Object, ObjectId};
use crate::normalize;
use crate::oid_diff;
use crate::replay::{self, ActivityLog, Inconsistency};
use crate::snapshot::{self, SnapshotOutcome};
use crate::sql::{Row, SqlSource};
use crate::store::Store;

/// Accumulated result of one `get_current`/`get_full_history` run.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub snapshot: SnapshotOutcome,
    pub inconsistencies: Vec<Inconsistency>,
    /// Sub-batches that exhausted their retry budget and were dropped;
    /// the rest of the run still completes (spec.md §5: "other workers
    /// continue and their results are still returned").
    pub failed_batches: usize,
    /// Prepared objects accumulated without persisting, when the run
    /// was made with `flush = false` -- empty otherwise.
    pub objects: Vec<Object>,
}

impl RunOutcome {
    fn merge(&mut self, other: RunOutcome) {
        self.snapshot.merge(other.snapshot);
        self.inconsistencies.extend(other.inconsistencies);
        self.failed_batches += other.failed_batches;
        self.objects.extend(other.objects);
    }
}

/// Current-value ingestion: snapshot a new version only where field
/// values differ from the live one. `flush = false` accumulates
/// prepared objects on [`RunOutcome::objects`] instead of persisting
/// them to `store` (spec.md §4.6's `flush` toggle, the original's
/// dry-run/buffer-for-later-flush path).
#[allow(clippy::too_many_arguments)]
pub async fn get_current(
    source: Arc<dyn SqlSource>,
    store: Arc<dyn Store>,
    loc: SourceLocation,
    fields: Arc<FieldMap>,
    ingest: &IngestConfig,
    last_known_oid: Option<&ObjectId>,
    last_start: Option<f64>,
    now: f64,
    flush: bool,
) -> Result<RunOutcome> {
    run(
        source,
        store,
        loc,
        fields,
        ingest,
        last_known_oid,
        last_start,
        now,
        None,
        None,
        None,
        true,
        flush,
    )
    .await
}

/// Full-history ingestion: additionally runs AR between NZ and SW to
/// reconstruct every historical version from `activity_log`. Every
/// inconsistency AR records is appended to `inconsistency_log`, the
/// engine's single append-only sink (spec.md §5: "scoped to a single
/// sink file"), in addition to being returned on [`RunOutcome`].
/// `autosnap` defaults to `false` in the source -- historical versions
/// already carry an explicit `_end` and so take the no-snapshot path
/// unchanged; set it `true` to instead merge the current (head)
/// version against the live document like `get_current` does.
#[allow(clippy::too_many_arguments)]
pub async fn get_full_history(
    source: Arc<dyn SqlSource>,
    store: Arc<dyn Store>,
    loc: SourceLocation,
    fields: Arc<FieldMap>,
    ingest: &IngestConfig,
    last_known_oid: Option<&ObjectId>,
    last_start: Option<f64>,
    now: f64,
    activity_log: Arc<dyn ActivityLog>,
    inconsistency_log: Arc<dyn InconsistencySink>,
    autosnap: bool,
    flush: bool,
) -> Result<RunOutcome> {
    run(
        source,
        store,
        loc,
        fields,
        ingest,
        last_known_oid,
        last_start,
        now,
        Some(activity_log),
        Some(inconsistency_log),
        ingest.cfield.clone(),
        autosnap,
        flush,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn run(
    source: Arc<dyn SqlSource>,
    store: Arc<dyn Store>,
    loc: SourceLocation,
    fields: Arc<FieldMap>,
    ingest: &IngestConfig,
    last_known_oid: Option<&ObjectId>,
    last_start: Option<f64>,
    now: f64,
    activity_log: Option<Arc<dyn ActivityLog>>,
    inconsistency_log: Option<Arc<dyn InconsistencySink>>,
    creation_field: Option<String>,
    autosnap: bool,
    flush: bool,
) -> Result<RunOutcome> {
    let oids = oid_diff::resolve(&*source, &loc, ingest, last_known_oid, last_start).await?;

    // Stable, deterministic batching: sort(unique(oids)) then chunk in
    // order -- already guaranteed by oid_diff::resolve's final sort+dedup.
    let worker_batches: Vec<Vec<ObjectId>> = oids
        .chunks(ingest.worker_batch_size.max(1))
        .map(|c| c.to_vec())
        .collect();

    let mut outcome = RunOutcome::default();

    if ingest.workers <= 1 || worker_batches.len() <= 1 {
        for batch in worker_batches {
            let r = run_worker_batch(
                source.clone(),
                &*store,
                &loc,
                &fields,
                ingest,
                batch,
                autosnap,
                flush,
                activity_log.as_deref(),
                inconsistency_log.as_deref(),
                creation_field.as_deref(),
                now,
            )
            .await;
            outcome.merge(r);
        }
        return Ok(outcome);
    }

    // Independent worker tasks, no shared mutable state beyond the
    // store/source trait objects themselves (both Send + Sync).
    // Concurrency is bounded to `workers` via the semaphore rather than
    // by the number of spawned tasks.
    let semaphore = Arc::new(Semaphore::new(ingest.workers));
    let mut joinset = JoinSet::new();
    for batch in worker_batches {
        let source = source.clone();
        let store = store.clone();
        let loc = loc.clone();
        let fields = fields.clone();
        let ingest = ingest.clone();
        let activity_log = activity_log.clone();
        let inconsistency_log = inconsistency_log.clone();
        let creation_field = creation_field.clone();
        let semaphore = semaphore.clone();
        joinset.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed during a run");
            run_worker_batch(
                source,
                &*store,
                &loc,
                &fields,
                &ingest,
                batch,
                autosnap,
                flush,
                activity_log.as_deref(),
                inconsistency_log.as_deref(),
                creation_field.as_deref(),
                now,
            )
            .await
        });
    }
    while let Some(joined) = joinset.join_next().await {
        match joined {
            Ok(r) => outcome.merge(r),
            Err(err) => {
                log::error!("worker task panicked: {err}");
                outcome.failed_batches += 1;
            }
        }
    }
    Ok(outcome)
}

/// One worker's share of the run: its oid batch, iterated sequentially
/// in `batch_size` sub-batches. Owns its own [`EngineCache`] (spec.md
/// §5: "the engine cache must be per-worker") and resolves its engine
/// handle through it once, up front, rather than opening one per
/// sub-batch.
#[allow(clippy::too_many_arguments)]
async fn run_worker_batch(
    source: Arc<dyn SqlSource>,
    store: &dyn Store,
    loc: &SourceLocation,
    fields: &FieldMap,
    ingest: &IngestConfig,
    oids: Vec<ObjectId>,
    autosnap: bool,
    flush: bool,
    activity_log: Option<&dyn ActivityLog>,
    inconsistency_log: Option<&dyn InconsistencySink>,
    creation_field: Option<&str>,
    now: f64,
) -> RunOutcome {
    let engine_cache = EngineCache::new();
    let key = EngineKey::new(source.dialect(), loc.qualified_table(), None);
    let engine = engine_cache.get_or_open(key, || source.clone());

    let mut outcome = RunOutcome::default();
    for sub in oids.chunks(ingest.batch_size.max(1)) {
        match process_sub_batch(
            &*engine,
            store,
            loc,
            fields,
            ingest.retries,
            sub,
            autosnap,
            flush,
            activity_log,
            inconsistency_log,
            creation_field,
            now,
        )
        .await
        {
            Ok((snapshot, inconsistencies, objects)) => {
                outcome.snapshot.merge(snapshot);
                outcome.inconsistencies.extend(inconsistencies);
                outcome.objects.extend(objects);
            }
            Err(err) => {
                log::error!("sub-batch of {} oid(s) failed after retries: {err}", sub.len());
                outcome.failed_batches += 1;
            }
        }
    }
    outcome
}

/// `SB -> SQL engine -> NZ [-> AR] -> SW`, with retries around the
/// transport-level query step only. `flush = false` stops short of SW
/// and returns the prepared objects instead of persisting them.
#[allow(clippy::too_many_arguments)]
async fn process_sub_batch(
    source: &dyn SqlSource,
    store: &dyn Store,
    loc: &SourceLocation,
    fields: &FieldMap,
    retries: u32,
    oids: &[ObjectId],
    autosnap: bool,
    flush: bool,
    activity_log: Option<&dyn ActivityLog>,
    inconsistency_log: Option<&dyn InconsistencySink>,
    creation_field: Option<&str>,
    now: f64,
) -> Result<(SnapshotOutcome, Vec<Inconsistency>, Vec<Object>)> {
    let sql = crate::sql_builder::build_select(fields, loc, Some(oids), false)?;
    let rows = fetch_with_retries(source, &sql, retries).await?;

    let mut to_write = Vec::with_capacity(rows.len());
    let mut inconsistencies = Vec::new();

    match activity_log {
        Some(log) => {
            let change_log = log.activity_get(oids).await?;
            for row in &rows {
                let mut object = normalize::normalize_row(row, fields, &loc.oid_column)?;
                // AR's contract expects the current-value object to
                // already carry `_start`; stamp it the same way SW
                // would default it when it's absent on the source row.
                if !object.contains("_start") {
                    object.set_start(now);
                }
                let oid = object.oid()?;
                let entries = change_log.get(&oid).cloned().unwrap_or_default();
                let (versions, incs) = replay::replay(&object, &entries, fields, creation_field)?;
                if let Some(sink) = inconsistency_log {
                    sink.append_all(&incs).await?;
                }
                inconsistencies.extend(incs);
                apply_autosnap(versions, autosnap, &mut to_write);
            }
        }
        None => {
            for row in &rows {
                to_write.push(normalize::normalize_row(row, fields, &loc.oid_column)?);
            }
        }
    }

    if flush {
        let outcome = snapshot::write(store, &loc.table, to_write, now).await?;
        Ok((outcome, inconsistencies, Vec::new()))
    } else {
        let objects = snapshot::prepare(to_write, now)?;
        Ok((SnapshotOutcome::default(), inconsistencies, objects))
    }
}

async fn fetch_with_retries(source: &dyn SqlSource, sql: &str, retries: u32) -> Result<Vec<Row>> {
    let attempts = retries.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match source.query(sql).await {
            Ok(rows) => return Ok(rows),
            Err(err) => {
                log::warn!("query attempt {attempt}/{attempts} failed: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(last_err
        .expect("the loop runs at least once since attempts is clamped to >= 1")
        .into())
}

/// Apply the `autosnap` policy to a replayed version list before
/// handing it to SW: historical versions always carry their explicit
/// `_end`; the head (current) version either keeps it -- taking the
/// no-snapshot insert path -- or has it stripped so SW diffs and
/// merges it against the live document instead.
fn apply_autosnap(mut versions: Vec<crate::model::Object>, autosnap: bool, out: &mut Vec<crate::model::Object>) {
    if let Some(head) = versions.last_mut() {
        if autosnap {
            head.0.shift_remove("_end");
        } else if !head.has_end_field() {
            head.set_end(None);
        }
    }
    out.extend(versions);
}
