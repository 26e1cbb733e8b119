/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Inconsistency log: an append-only, write-only sink for the lines AR
//! produces when a change-log entry's assumed prior value doesn't
//! match what's on the object. Matches `generic.py`'s
//! `_setup_inconsistency_log`/`_log_inconsistency`. Scoped to a single
//! sink file; concurrent appenders serialize on the file handle so
//! each line is written atomically (spec.md §5's "Shared resources").

use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::replay::Inconsistency;

#[async_trait]
pub trait InconsistencySink: Send + Sync {
    async fn append(&self, inconsistency: &Inconsistency) -> Result<()>;

    async fn append_all(&self, items: &[Inconsistency]) -> Result<()> {
        for item in items {
            self.append(item).await?;
        }
        Ok(())
    }
}

/// File-backed sink, one line per inconsistency in
/// [`Inconsistency::format_line`]'s format.
pub struct FileInconsistencyLog {
    file: Mutex<File>,
}

impl FileInconsistencyLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(Self { file: Mutex::new(file) })
    }
}

#[async_trait]
impl InconsistencySink for FileInconsistencyLog {
    async fn append(&self, inconsistency: &Inconsistency) -> Result<()> {
        let mut line = inconsistency.format_line();
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        file.flush().await.map_err(|e| Error::Io(e.to_string()))
    }
}

/// In-memory sink for tests, in the same spirit as
/// [`crate::sql::memory::MemorySource`] / [`crate::store::memory::MemoryStore`].
#[derive(Default)]
pub struct MemoryInconsistencyLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryInconsistencyLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }
}

#[async_trait]
impl InconsistencySink for MemoryInconsistencyLog {
    async fn append(&self, inconsistency: &Inconsistency) -> Result<()> {
        self.lines.lock().await.push(inconsistency.format_line());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectId;
    use serde_json::json;

    fn sample() -> Inconsistency {
        Inconsistency {
            oid: ObjectId::Int(1),
            field: "status".to_string(),
            removed: json!("open"),
            added: json!("closed"),
            last_val: json!("closed"),
            when: 500.0,
        }
    }

    #[tokio::test]
    async fn memory_sink_records_one_line_per_append() {
        let sink = MemoryInconsistencyLog::new();
        sink.append(&sample()).await.unwrap();
        sink.append(&sample()).await.unwrap();
        let lines = sink.lines().await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("status"));
    }

    #[tokio::test]
    async fn append_all_preserves_order() {
        let sink = MemoryInconsistencyLog::new();
        let mut second = sample();
        second.when = 600.0;
        sink.append_all(&[sample(), second]).await.unwrap();
        let lines = sink.lines().await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("500"));
        assert!(lines[1].ends_with("600"));
    }

    #[tokio::test]
    async fn file_sink_appends_without_truncating() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("bitempo-inconsistency-log-test-{}.log", uuid::Uuid::new_v4()));
        {
            let sink = FileInconsistencyLog::open(&path).await.unwrap();
            sink.append(&sample()).await.unwrap();
        }
        {
            let sink = FileInconsistencyLog::open(&path).await.unwrap();
            sink.append(&sample()).await.unwrap();
        }
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
