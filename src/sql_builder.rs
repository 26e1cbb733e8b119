/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! SQL Builder (SB): emits the single `SELECT` that fetches a batch of
//! rows for a field schema. Matches `generic.py::_generate_sql` and
//! `_left_join`.

use crate::config::SourceLocation;
use crate::error::{Error, Result};
use crate::model::{FieldMap, ObjectId};

/// Build the `SELECT` for `fields` against `loc`, optionally
/// restricted to `oids` and sorted by the oid column. Trailing
/// `f.sql` fragments are appended in FS iteration order, so callers
/// that need a join visible to a later field's `select` expression
/// must declare that field after the join in the schema.
pub fn build_select(
    fields: &FieldMap,
    loc: &SourceLocation,
    oids: Option<&[ObjectId]>,
    sort: bool,
) -> Result<String> {
    if loc.db.is_empty() || loc.table.is_empty() || loc.oid_column.is_empty() {
        return Err(Error::Config(
            "db, table and _oid column are all required to build a query".to_string(),
        ));
    }
    let table = &loc.table;
    let mut selects = Vec::with_capacity(fields.len());
    let mut stmts = Vec::new();
    for (name, schema) in fields {
        let select = schema
            .select
            .clone()
            .unwrap_or_else(|| format!("{table}.{name}"));
        selects.push(format!("{select} AS {name}"));
        if let Some(sql) = &schema.sql {
            stmts.push(sql.clone());
        }
    }
    let mut query = format!("SELECT {} FROM {}.{}", selects.join(", "), loc.db, loc.table);
    if !stmts.is_empty() {
        query.push(' ');
        query.push_str(&stmts.join(" "));
    }
    if let Some(oids) = oids {
        if !oids.is_empty() {
            let csv = oids
                .iter()
                .map(ObjectId::sql_literal)
                .collect::<Vec<_>>()
                .join(", ");
            query.push_str(&format!(" WHERE {table}.{} IN ({csv})", loc.oid_column));
        }
    }
    if sort {
        query.push_str(&format!(" ORDER BY {table}.{} ASC", loc.oid_column));
    }
    Ok(collapse_whitespace(&query))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Produce a `{select, sql}` fragment pair for a left join, to be
/// merged into a `FieldSchema` entry before calling [`build_select`].
/// `on_db`/`on_table`/`join_db` default to the base source location,
/// matching `generic.py::_left_join`'s optional overrides.
pub fn left_join(
    loc: &SourceLocation,
    alias: &str,
    select_prop: &str,
    join_prop: &str,
    join_table: &str,
    on_col: &str,
    on_db: Option<&str>,
    on_table: Option<&str>,
    join_db: Option<&str>,
) -> (String, String) {
    let on_db = on_db.unwrap_or(&loc.db);
    let on_table = on_table.unwrap_or(&loc.table);
    let join_db = join_db.unwrap_or(&loc.db);
    let select = format!("{alias}.{select_prop}");
    let sql = format!(
        "LEFT JOIN {join_db}.{join_table} {alias} ON {on_db}.{on_table}.{on_col} = {alias}.{join_prop}"
    );
    (select, sql)
}
