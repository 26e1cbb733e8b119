/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! The document store is an external collaborator: the snapshot
//! writer never touches a driver directly, it talks to whatever
//! implements [`Store`]. Operation set matches spec.md §6
//! (`ensure_index`, `find`, `update`, `insert`, `drop`,
//! `index_information`, plus fresh-`_id` minting), generalized from
//! `dbdaemon::database::backend::Database`'s Elasticsearch-specific
//! shape to a document-store-agnostic one.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Object;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),
    #[error("document not found: {0}")]
    NotFound(String),
}

/// A stored document together with its store-assigned `_id`.
#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub id: String,
    pub object: Object,
}

/// Index key direction, matching the `(_oid, 1)` / `(_end, -1)` style
/// tuples the source passes to `ensure_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ensure_index(&self, table: &str, keys: &[(String, SortDir)]) -> Result<()>;

    /// Live versions (`_end = null`) for the given oids, as persisted.
    async fn find_live(&self, table: &str, oids: &[crate::model::ObjectId]) -> Result<Vec<StoredDoc>>;

    /// Close a live version by setting its `_end` bound.
    async fn update_end(&self, table: &str, id: &str, end: f64) -> Result<()>;

    /// Bulk-insert new documents (`manipulate=false`: the store does
    /// not mutate or validate the payload beyond assigning storage
    /// metadata).
    async fn insert_many(&self, table: &str, docs: Vec<Object>) -> Result<()>;

    /// Overwrite an existing document in place by `_id`.
    async fn overwrite(&self, table: &str, id: &str, doc: Object) -> Result<()>;

    async fn drop_table(&self, table: &str) -> Result<()>;

    async fn index_information(&self, table: &str) -> Result<Vec<String>>;

    /// Mint a fresh, opaque `_id` for a new document.
    fn mint_id(&self) -> String;
}
