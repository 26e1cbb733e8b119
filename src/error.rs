/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use thiserror::Error;

use crate::model::ObjectId;
use crate::sql::SourceError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type, covering every failure mode named in the
/// engine's error handling design: config/schema errors are fatal,
/// source/store errors wrap the external-collaborator traits, and
/// creation-time errors are non-fatal (logged and swallowed by the
/// caller rather than constructed here).
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing required configuration: {0}")]
    Config(String),
    #[error("schema violation on field '{field}': {reason}")]
    Schema { field: String, reason: String },
    #[error("unknown field referenced: {0}")]
    UnknownField(String),
    #[error("source transport error: {0}")]
    Source(#[from] SourceError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("object {0} is missing a numeric '_start'")]
    NonNumericStart(ObjectId),
    #[error("object is missing '_oid'")]
    MissingOid,
    #[error("I/O error: {0}")]
    Io(String),
}
