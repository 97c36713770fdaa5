//! Engine adapter layer.
//!
//! The reader module wraps the analytical engine behind the few calls the rest
//! of the crate needs: run a statement and collect its columns and rows,
//! describe a table, and expose uploaded files as views or attached databases.
//!
//! # Example
//!
//! ```rust,ignore
//! use litehouse::reader::DuckDBReader;
//!
//! let reader = DuckDBReader::from_connection_string("duckdb://memory")?;
//! let output = reader.execute_sql("SELECT 1 AS x, 'a' AS y")?;
//! assert_eq!(output.columns[0].column_type, "INTEGER");
//! ```

use serde::Serialize;

pub mod duckdb;

pub use self::duckdb::DuckDBReader;

/// A result column as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// Columns and JSON-converted rows of one executed statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryOutput {
    /// First column of the first row, if any
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        self.rows.first().and_then(|row| row.first())
    }
}
