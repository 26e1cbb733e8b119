/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! In-memory `SqlSource` for tests, in the spirit of the teacher's
//! `HashMap`-backed `SingleVersionedData`/`DualVersionedData`
//! (`#[cfg(test)] pub fn new()`): no network, no driver, just enough
//! state to exercise OD/SB/NZ/BD against known rows.

use parking_lot::Mutex;

use super::{Result, Row, SqlSource};

#[derive(Debug)]
pub struct MemorySource {
    rows: Vec<Row>,
    dialect: String,
    /// Every query string this source has been asked to run, in order.
    /// Tests assert against this to check SB's generated SQL.
    queries: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(dialect: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            rows,
            dialect: dialect.into(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait::async_trait]
impl SqlSource for MemorySource {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.queries.lock().push(sql.to_string());
        Ok(self.rows.clone())
    }

    fn dialect(&self) -> &str {
        &self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::RawValue;

    #[tokio::test]
    async fn records_issued_queries() {
        let mut row = Row::new();
        row.insert("_oid".to_string(), RawValue::Int(1));
        let source = MemorySource::new("oracle", vec![row]);
        source.query("SELECT 1").await.unwrap();
        assert_eq!(source.queries(), vec!["SELECT 1".to_string()]);
    }
}
