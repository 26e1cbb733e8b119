/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! The SQL source is an external collaborator: this engine never talks
//! to a driver directly, it talks to whatever implements [`SqlSource`].
//! Modeled on `dbdaemon::database::backend::Database`, generalized from
//! an Elasticsearch-shaped document API to a row-oriented SQL one.

pub mod memory;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("connection to source failed: {0}")]
    Connect(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// A value as it comes off the wire, before normalization. `Blob`
/// models the opaque byte-buffer values some drivers hand back for
/// CLOB/XMLTYPE-ish columns (spec design note: "opaque blob values").
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub type Row = IndexMap<String, RawValue>;

/// Query-only access to a relational source. Connection coordinates
/// and dialect metadata live in `SourceConfig` (see `crate::config`);
/// implementations are expected to be cheap to clone or already
/// `Arc`-wrapped, since one is shared across worker tasks.
#[async_trait]
pub trait SqlSource: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Dialect name, carried through to the SQL Builder's literal
    /// rendering and to inconsistency-log/error messages.
    fn dialect(&self) -> &str;
}
