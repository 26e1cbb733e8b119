/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! In-memory `Store`, grounded in the teacher's `RwLock<HashMap<...>>>`
//! table-state pattern (`daemon/state.rs`) and the `HashMap`-backed
//! `SingleVersionedData`/`DualVersionedData` test constructors.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{Object, ObjectId};

use super::{Result, SortDir, Store, StoreError, StoredDoc};

#[derive(Default)]
struct Table {
    docs: Vec<StoredDoc>,
    indices: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document currently stored in `table`, for
    /// test assertions.
    pub fn documents(&self, table: &str) -> Vec<StoredDoc> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.docs.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn ensure_index(&self, table: &str, keys: &[(String, SortDir)]) -> Result<()> {
        let label = keys
            .iter()
            .map(|(k, dir)| format!("{k}:{}", if *dir == SortDir::Asc { 1 } else { -1 }))
            .collect::<Vec<_>>()
            .join(",");
        let mut tables = self.tables.write();
        let entry = tables.entry(table.to_string()).or_default();
        if !entry.indices.contains(&label) {
            entry.indices.push(label);
        }
        Ok(())
    }

    async fn find_live(&self, table: &str, oids: &[ObjectId]) -> Result<Vec<StoredDoc>> {
        let tables = self.tables.read();
        let Some(entry) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .docs
            .iter()
            .filter(|d| d.object.end().is_none())
            .filter(|d| {
                d.object
                    .oid()
                    .map(|oid| oids.contains(&oid))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn update_end(&self, table: &str, id: &str, end: f64) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound(table.to_string()))?;
        let doc = entry
            .docs
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.object.set_end(Some(end));
        Ok(())
    }

    async fn insert_many(&self, table: &str, docs: Vec<Object>) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables.entry(table.to_string()).or_default();
        for object in docs {
            let id = object
                .id()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            entry.docs.push(StoredDoc { id, object });
        }
        Ok(())
    }

    async fn overwrite(&self, table: &str, id: &str, doc: Object) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables.entry(table.to_string()).or_default();
        match entry.docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.object = doc,
            None => entry.docs.push(StoredDoc {
                id: id.to_string(),
                object: doc,
            }),
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.tables.write().remove(table);
        Ok(())
    }

    async fn index_information(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.indices.clone())
            .unwrap_or_default())
    }

    fn mint_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
