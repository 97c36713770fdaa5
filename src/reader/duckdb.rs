//! DuckDB reader.
//!
//! One [`DuckDBReader`] owns exactly one DuckDB connection. The connection is
//! not `Sync`, so callers that share a reader across tasks wrap it in a mutex
//! (see [`crate::session::Session`]).

use std::path::Path;
use std::sync::Arc;

use ::duckdb::arrow::datatypes::DataType;
use ::duckdb::types::{TimeUnit, ValueRef};
use ::duckdb::{params, Connection, InterruptHandle};
use serde_json::Value as JsonValue;

use super::{ColumnInfo, QueryOutput};
use crate::{LitehouseError, Result};

/// A reader backed by a single DuckDB connection
pub struct DuckDBReader {
    conn: Connection,
}

impl std::fmt::Debug for DuckDBReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDBReader").finish_non_exhaustive()
    }
}

impl DuckDBReader {
    /// Open a connection from `duckdb://memory` or `duckdb://<path>`
    pub fn from_connection_string(uri: &str) -> Result<Self> {
        let target = uri.strip_prefix("duckdb://").ok_or_else(|| {
            LitehouseError::InternalError(format!("Unsupported connection string: {}", uri))
        })?;

        let conn = match target {
            "memory" | ":memory:" | "" => Connection::open_in_memory(),
            path => Connection::open(path),
        }
        .map_err(|e| LitehouseError::InternalError(format!("Failed to open DuckDB: {}", e)))?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Handle that aborts whatever statement this connection is running
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        self.conn.interrupt_handle()
    }

    /// Execute a statement and collect every row
    pub fn execute_sql(&self, sql: &str) -> Result<QueryOutput> {
        let mut stmt = self.conn.prepare(sql).map_err(execution_error)?;
        let mut rows_result = stmt.query([]).map_err(execution_error)?;

        let columns: Vec<ColumnInfo> = match rows_result.as_ref() {
            Some(executed) => executed
                .column_names()
                .into_iter()
                .enumerate()
                .map(|(idx, name)| ColumnInfo::new(name, sql_type_name(&executed.column_type(idx))))
                .collect(),
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        while let Some(row) = rows_result.next().map_err(execution_error)? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(value_to_json))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(execution_error)?;
            rows.push(values);
        }

        Ok(QueryOutput { columns, rows })
    }

    /// Column names and types of a table or view, via `DESCRIBE`
    pub fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("DESCRIBE {}", table);
        let mut stmt = self.conn.prepare(&sql).map_err(execution_error)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })
            .map_err(execution_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(execution_error)?;
        Ok(columns)
    }

    /// Expose a file as a view through one of DuckDB's table functions
    pub fn create_file_view(&self, name: &str, scan_function: &str, path: &Path) -> Result<()> {
        let sql = format!(
            "CREATE VIEW {} AS SELECT * FROM {}({})",
            name,
            scan_function,
            string_literal(&path.to_string_lossy())
        );
        self.conn
            .execute(&sql, params![])
            .map_err(|e| LitehouseError::RegistrationError(e.to_string()))?;
        Ok(())
    }

    /// Attach a database file read-only under `alias`.
    ///
    /// `db_type` names a storage extension (e.g. `sqlite`) for files that are
    /// not DuckDB databases; the extension is loaded first.
    pub fn attach_database(&self, path: &Path, alias: &str, db_type: Option<&str>) -> Result<()> {
        let options = match db_type {
            Some(db_type) => {
                self.load_extension(db_type)?;
                format!("TYPE {}, READ_ONLY", db_type)
            }
            None => "READ_ONLY".to_string(),
        };
        let sql = format!(
            "ATTACH {} AS {} ({})",
            string_literal(&path.to_string_lossy()),
            alias,
            options
        );
        self.conn
            .execute(&sql, params![])
            .map_err(|e| LitehouseError::RegistrationError(e.to_string()))?;
        Ok(())
    }

    /// Load a DuckDB extension, installing it if it is not available locally
    fn load_extension(&self, name: &str) -> Result<()> {
        if self.conn.execute_batch(&format!("LOAD {}", name)).is_ok() {
            return Ok(());
        }
        self.conn
            .execute_batch(&format!("INSTALL {0}; LOAD {0};", name))
            .map_err(|e| {
                LitehouseError::RegistrationError(format!(
                    "DuckDB {} extension unavailable: {}",
                    name, e
                ))
            })
    }
}

fn execution_error(e: ::duckdb::Error) -> LitehouseError {
    LitehouseError::ExecutionError(e.to_string())
}

/// Quote a value as a SQL string literal
pub(crate) fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// DuckDB's SQL name for an Arrow result type
fn sql_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "NULL".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float16 | DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "VARCHAR".to_string(),
        DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => "BLOB".to_string(),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Time32(_) | DataType::Time64(_) => "TIME".to_string(),
        DataType::Timestamp(_, None) => "TIMESTAMP".to_string(),
        DataType::Timestamp(_, Some(_)) => "TIMESTAMP WITH TIME ZONE".to_string(),
        DataType::Interval(_) | DataType::Duration(_) => "INTERVAL".to_string(),
        DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
            format!("DECIMAL({},{})", precision, scale)
        }
        DataType::List(field) | DataType::LargeList(field) => {
            format!("{}[]", sql_type_name(field.data_type()))
        }
        DataType::FixedSizeList(field, size) => {
            format!("{}[{}]", sql_type_name(field.data_type()), size)
        }
        DataType::Struct(fields) => {
            let members: Vec<String> = fields
                .iter()
                .map(|f| format!("{} {}", f.name(), sql_type_name(f.data_type())))
                .collect();
            format!("STRUCT({})", members.join(", "))
        }
        DataType::Dictionary(_, value) => sql_type_name(value),
        other => format!("{:?}", other).to_uppercase(),
    }
}

fn micros(unit: &TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert a single DuckDB value to JSON
fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => JsonValue::Bool(b),
        ValueRef::TinyInt(v) => JsonValue::Number(v.into()),
        ValueRef::SmallInt(v) => JsonValue::Number(v.into()),
        ValueRef::Int(v) => JsonValue::Number(v.into()),
        ValueRef::BigInt(v) => JsonValue::Number(v.into()),
        ValueRef::HugeInt(v) => match i64::try_from(v) {
            Ok(n) => JsonValue::Number(n.into()),
            Err(_) => JsonValue::String(v.to_string()),
        },
        ValueRef::UTinyInt(v) => JsonValue::Number(v.into()),
        ValueRef::USmallInt(v) => JsonValue::Number(v.into()),
        ValueRef::UInt(v) => JsonValue::Number(v.into()),
        ValueRef::UBigInt(v) => JsonValue::Number(v.into()),
        ValueRef::Float(v) => serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Double(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Decimal(d) => JsonValue::String(d.to_string()),
        ValueRef::Text(s) => JsonValue::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(hex::encode(b)),
        ValueRef::Date32(days) => {
            match chrono::DateTime::from_timestamp(i64::from(days) * 86_400, 0) {
                Some(dt) => JsonValue::String(dt.date_naive().format("%Y-%m-%d").to_string()),
                None => JsonValue::Null,
            }
        }
        ValueRef::Timestamp(unit, v) => {
            match chrono::DateTime::from_timestamp_micros(micros(&unit, v)) {
                Some(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
                None => JsonValue::Null,
            }
        }
        ValueRef::Time64(unit, v) => {
            let us = micros(&unit, v);
            let secs = (us / 1_000_000) as u32;
            let nanos = ((us % 1_000_000) * 1_000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                Some(t) => JsonValue::String(t.format("%H:%M:%S%.f").to_string()),
                None => JsonValue::Null,
            }
        }
        other => {
            tracing::debug!("Converting unsupported DuckDB value to string: {:?}", other);
            JsonValue::String(format!("{:?}", other))
        }
    }
}
