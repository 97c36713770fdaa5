/*!
# LiteHouse - session-scoped SQL over uploaded files

LiteHouse lets a client register data files (CSV, Parquet, JSON or an embedded
database) inside an isolated session and run read-only analytical queries
against them. Every session owns one in-memory DuckDB connection, one table
namespace and one scratch directory.

## Pipeline

```text
raw SQL ─► validate ─► compose ─► execute (schema probe, data, count) ─► response
```

## Example

```rust,ignore
use litehouse::{Config, QuerySpec, SessionManager};

let manager = SessionManager::new(Config::default());
let config = manager.config();
let session = manager.create()?;
let table = session.register("people.csv", bytes, config.registration_timeout).await?;
let spec = QuerySpec::new(&format!("SELECT * FROM {}", table.name), 100, 0)?;
let response = session.query(&spec, config).await?;
```
*/

pub mod compose;
pub mod config;
pub mod execute;
pub mod reader;
pub mod registry;
pub mod session;
pub mod validate;

pub use compose::QueryPlan;
pub use config::Config;
pub use execute::QueryResponse;
pub use reader::{ColumnInfo, DuckDBReader, QueryOutput};
pub use registry::{FileKind, TableMeta};
pub use session::{Session, SessionManager};
pub use validate::QuerySpec;

/// Crate version, reported by the binaries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main error type for LiteHouse operations
#[derive(Debug, thiserror::Error)]
pub enum LitehouseError {
    /// Client SQL violates the read-only contract
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// The engine rejected a statement
    #[error("Query execution failed: {0}")]
    ExecutionError(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Unsupported file type: {0}. Supported: .csv, .parquet, .json, .jsonl, .ndjson, .sqlite, .sqlite3, .db")]
    UnsupportedFileKind(String),

    /// Persisting the file or creating its view/attachment failed
    #[error("Failed to register table: {0}")]
    RegistrationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LitehouseError {
    pub(crate) fn query_timeout(timeout: std::time::Duration) -> Self {
        LitehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

pub type Result<T> = std::result::Result<T, LitehouseError>;
