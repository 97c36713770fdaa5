//! Statement composition for schema probing, paging and counting.
//!
//! A validated query is never rewritten structurally. Each variant either wraps
//! it as a sub-query or appends a clause, so joins, CTEs and aggregates keep
//! their meaning and the engine does all of the parsing.
//!
//! Paging is only appended when the query does not already mention `LIMIT` or
//! `OFFSET` anywhere (case-insensitive substring match). A query that merely
//! contains one of those words, say in a column name, is therefore sent
//! unpaged: the caller may get more rows than the page size, never fewer.

use crate::validate::QuerySpec;

/// The statements executed for one query request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Zero-row execution used only to read column names and types
    pub schema_sql: String,
    /// The page of rows returned to the caller
    pub data_sql: String,
    /// Best-effort total row count
    pub count_sql: String,
}

impl QueryPlan {
    /// Compose the statements for already-cleaned SQL
    pub fn new(sql: &str, limit: usize, offset: usize) -> Self {
        Self {
            schema_sql: schema_probe(sql),
            data_sql: paginate(sql, limit, offset),
            count_sql: count_rows(sql),
        }
    }

    pub fn from_spec(spec: &QuerySpec) -> Self {
        Self::new(&spec.sql, spec.limit, spec.offset)
    }
}

pub fn schema_probe(sql: &str) -> String {
    format!("SELECT * FROM ({}) LIMIT 0", sql)
}

pub fn count_rows(sql: &str) -> String {
    format!("SELECT COUNT(*) FROM ({})", sql)
}

/// Append `LIMIT .. OFFSET ..` unless the query already pages itself
pub fn paginate(sql: &str, limit: usize, offset: usize) -> String {
    if has_paging(sql) {
        sql.to_string()
    } else {
        format!("{} LIMIT {} OFFSET {}", sql, limit, offset)
    }
}

fn has_paging(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper.contains("LIMIT") || upper.contains("OFFSET")
}
