/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! CLI entry point. Parses the source/ingest configuration, wires up
//! logging, and runs one `get_current`/`get_full_history` pass. The
//! SQL engine and document store are external collaborators (out of
//! scope for this crate, see spec's Non-goals); this binary wires the
//! in-memory reference implementations so the CLI surface is runnable
//! end to end, and a real deployment embeds `bitempo` as a library
//! with its own `SqlSource`/`Store` instead.

use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use thiserror::Error;

use bitempo::config::Cli;
use bitempo::inconsistency_log::{FileInconsistencyLog, InconsistencySink, MemoryInconsistencyLog};
use bitempo::model::FieldMap;
use bitempo::replay::MemoryActivityLog;
use bitempo::sql::memory::MemorySource;
use bitempo::store::memory::MemoryStore;
use bitempo::{batch, Error as EngineError};

#[derive(Error, Debug)]
enum Error {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let r = run(cli).await;
    if let Err(err) = &r {
        error!("run failed: {err}");
    }
    r
}

async fn run(cli: Cli) -> Result<(), Error> {
    let loc = cli.source.location()?;
    let fields = Arc::new(FieldMap::new());

    // No rows and no prior state without a real driver behind these;
    // this exercises the full pipeline against an empty source.
    let source: Arc<dyn bitempo::sql::SqlSource> = Arc::new(MemorySource::new(cli.source.dialect.clone(), vec![]));
    let store: Arc<dyn bitempo::store::Store> = Arc::new(MemoryStore::new());
    let now = now_unix();

    let outcome = if cli.full_history {
        let activity_log: Arc<dyn bitempo::replay::ActivityLog> =
            Arc::new(MemoryActivityLog::new(Default::default()));
        let inconsistency_log: Arc<dyn InconsistencySink> = match &cli.inconsistency_log {
            Some(path) => Arc::new(FileInconsistencyLog::open(path).await?),
            None => Arc::new(MemoryInconsistencyLog::new()),
        };
        batch::get_full_history(
            source,
            store,
            loc,
            fields,
            &cli.ingest,
            None,
            None,
            now,
            activity_log,
            inconsistency_log,
            false,
            true,
        )
        .await?
    } else {
        batch::get_current(source, store, loc, fields, &cli.ingest, None, None, now, true).await?
    };

    info!(
        "run complete: {} inserted, {} closed, {} overwritten, {} inconsistencies, {} failed batches",
        outcome.snapshot.inserted,
        outcome.snapshot.closed,
        outcome.snapshot.overwritten,
        outcome.inconsistencies.len(),
        outcome.failed_batches
    );
    Ok(())
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
