/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Command-line / environment configuration surface, mirroring
//! `dbdaemon::main::Args`'s `#[clap(long, env, ...)]` style and
//! `database::elastic::backend::DatabaseConfig`'s flattened-sub-struct
//! convention.

use std::path::PathBuf;

use clap::{Args, Parser};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oid_diff::Force;

/// Top-level CLI entry point: one binary flattens the source
/// connection settings and the ingest policy settings.
#[derive(Parser, Debug)]
#[command(about = "Bitemporal SQL-to-document-store ETL engine")]
pub struct Cli {
    #[clap(flatten)]
    pub source: SourceConfig,
    #[clap(flatten)]
    pub ingest: IngestConfig,
    /// Run full-history ingestion (activity replay) instead of current-value snapshotting.
    #[clap(long, env = "BITEMPO_FULL_HISTORY")]
    pub full_history: bool,
    /// Append-only log file for AR inconsistencies; kept in memory (and
    /// discarded) when unset.
    #[clap(long, env = "BITEMPO_INCONSISTENCY_LOG")]
    pub inconsistency_log: Option<PathBuf>,
    /// Increase log verbosity.
    #[clap(long, short, env = "BITEMPO_VERBOSE", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Source coordinates and connection settings (spec.md §6's
/// "Connection" keys plus `db`/`table`/`_oid`).
#[derive(Serialize, Deserialize, Args, Debug, Clone, Default)]
pub struct SourceConfig {
    #[clap(env = "BITEMPO_DB", long)]
    pub db: Option<String>,
    #[clap(env = "BITEMPO_TABLE", long)]
    pub table: Option<String>,
    #[clap(env = "BITEMPO_OID", long = "oid-column")]
    pub oid: Option<String>,
    #[clap(env = "BITEMPO_DIALECT", long, default_value = "generic")]
    pub dialect: String,
    #[clap(env = "BITEMPO_USERNAME", long)]
    pub username: Option<String>,
    #[clap(env = "BITEMPO_PASSWORD", long)]
    pub password: Option<String>,
    #[clap(env = "BITEMPO_HOST", long)]
    pub host: Option<String>,
    #[clap(env = "BITEMPO_PORT", long)]
    pub port: Option<u16>,
    #[clap(env = "BITEMPO_VDB", long)]
    pub vdb: Option<String>,
}

impl SourceConfig {
    /// Resolve the required source coordinates, or fail with
    /// `ConfigError` -- matches SB's "fails with ConfigError when db,
    /// table, or _oid is missing" rule.
    pub fn location(&self) -> Result<SourceLocation> {
        Ok(SourceLocation {
            db: self
                .db
                .clone()
                .ok_or_else(|| Error::Config("missing required 'db'".to_string()))?,
            table: self
                .table
                .clone()
                .ok_or_else(|| Error::Config("missing required 'table'".to_string()))?,
            oid_column: self
                .oid
                .clone()
                .ok_or_else(|| Error::Config("missing required '_oid' column".to_string()))?,
        })
    }
}

/// Validated source coordinates, as consumed by SB/OD.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub db: String,
    pub table: String,
    pub oid_column: String,
}

impl SourceLocation {
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.db, self.table)
    }
}

/// Batch/worker/delta-policy settings (spec.md §6's remaining
/// configuration keys).
#[derive(Serialize, Deserialize, Args, Debug, Clone)]
pub struct IngestConfig {
    #[clap(env = "BITEMPO_BATCH_SIZE", long, default_value_t = 1000)]
    pub batch_size: usize,
    #[clap(env = "BITEMPO_WORKER_BATCH_SIZE", long, default_value_t = 5000)]
    pub worker_batch_size: usize,
    #[clap(env = "BITEMPO_RETRIES", long, default_value_t = 1)]
    pub retries: u32,
    #[clap(env = "BITEMPO_WORKERS", long, default_value_t = 1)]
    pub workers: usize,
    /// Creation-time field name, for AR's backdate step.
    #[clap(env = "BITEMPO_CFIELD", long)]
    pub cfield: Option<String>,
    #[clap(env = "BITEMPO_DELTA_NEW_IDS", long, default_value_t = true)]
    pub delta_new_ids: bool,
    #[clap(env = "BITEMPO_DELTA_MTIME", long, value_delimiter = ',')]
    pub delta_mtime: Vec<String>,
    #[clap(env = "BITEMPO_PARSE_TIMESTAMP", long, default_value_t = true)]
    pub parse_timestamp: bool,
    /// Force a full refresh of every oid.
    #[clap(long)]
    pub force: bool,
    /// Force a refresh of exactly these oids (repeatable). Takes
    /// precedence over `--force` when both are given a non-default
    /// value is moot: `--force` alone already means "all oids".
    #[clap(long = "force-oid")]
    pub force_oids: Vec<String>,
}

impl IngestConfig {
    pub fn force(&self) -> Force {
        if self.force {
            Force::All
        } else if !self.force_oids.is_empty() {
            Force::Oids(
                self.force_oids
                    .iter()
                    .map(|s| crate::model::ObjectId::parse(s))
                    .collect(),
            )
        } else {
            Force::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_is_a_config_error() {
        let cfg = SourceConfig {
            db: Some("db".into()),
            ..Default::default()
        };
        assert!(matches!(cfg.location(), Err(Error::Config(_))));
    }

    #[test]
    fn fully_specified_location_resolves() {
        let cfg = SourceConfig {
            db: Some("db".into()),
            table: Some("t".into()),
            oid: Some("id".into()),
            ..Default::default()
        };
        let loc = cfg.location().unwrap();
        assert_eq!(loc.qualified_table(), "db.t");
    }
}
