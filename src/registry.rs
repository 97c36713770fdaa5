//! Per-session table registry.
//!
//! Uploaded files become tables in two ways. Flat files (CSV, Parquet, JSON)
//! are exposed as a view named `{kind}_{n}`, where `n` is one more than the
//! number of tables already registered. Embedded database files are attached
//! read-only as `db_{m}` (one more than the number of attached databases) and
//! the table is registered as `db_{m}.main`.
//!
//! Names are never reused: there is no per-table removal. Uploaded files are
//! never overwritten either, so every registered table keeps reading the bytes
//! it was registered with.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Serialize;
use tracing::info;

use crate::reader::DuckDBReader;
use crate::{LitehouseError, Result};

/// Table inside an attached database that the registered name points at
pub const DEFAULT_ATTACHED_TABLE: &str = "main";

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// Whether `bytes` start with the SQLite database file header
pub fn is_sqlite_database(bytes: &[u8]) -> bool {
    bytes.starts_with(SQLITE_HEADER)
}

/// Kind of an uploaded file, decided by its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Parquet,
    Json,
    /// Embedded relational database, attached rather than viewed
    Sqlite,
}

impl FileKind {
    /// Classify a filename by extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "csv" => Ok(FileKind::Csv),
            "parquet" => Ok(FileKind::Parquet),
            "json" | "jsonl" | "ndjson" => Ok(FileKind::Json),
            "sqlite" | "sqlite3" | "db" => Ok(FileKind::Sqlite),
            _ => Err(LitehouseError::UnsupportedFileKind(filename.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Parquet => "parquet",
            FileKind::Json => "json",
            FileKind::Sqlite => "sqlite",
        }
    }

    /// DuckDB table function that reads this kind, `None` for attached databases
    pub fn scan_function(&self) -> Option<&'static str> {
        match self {
            FileKind::Csv => Some("read_csv_auto"),
            FileKind::Parquet => Some("read_parquet"),
            FileKind::Json => Some("read_json_auto"),
            FileKind::Sqlite => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of one registered table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMeta {
    pub name: String,
    pub kind: FileKind,
    pub path: PathBuf,
    /// Attached database alias, only for [`FileKind::Sqlite`]
    pub db: Option<String>,
}

/// Registered tables of one session, in registration order
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Vec<TableMeta>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn list(&self) -> &[TableMeta] {
        &self.tables
    }

    /// Table name and attached database alias for the next file of `kind`
    pub fn allocate(&self, kind: FileKind) -> (String, Option<String>) {
        match kind {
            FileKind::Sqlite => {
                let attached = self
                    .tables
                    .iter()
                    .filter(|t| t.kind == FileKind::Sqlite)
                    .count();
                let db = format!("db_{}", attached + 1);
                (format!("{}.{}", db, DEFAULT_ATTACHED_TABLE), Some(db))
            }
            _ => (format!("{}_{}", kind, self.tables.len() + 1), None),
        }
    }

    pub fn insert(&mut self, table: TableMeta) -> Result<()> {
        if self.contains(&table.name) {
            return Err(LitehouseError::RegistrationError(format!(
                "Table '{}' already exists",
                table.name
            )));
        }
        self.tables.push(table);
        Ok(())
    }
}

/// Final path component of an uploaded filename
pub fn sanitize_filename(filename: &str) -> Result<String> {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| LitehouseError::UnsupportedFileKind(filename.to_string()))
}

/// Where an upload is stored: its own name, or `{prefix}_{filename}` when an
/// earlier upload already took that name
fn storage_path(workspace: &Path, filename: &str, prefix: &str) -> PathBuf {
    let path = workspace.join(filename);
    if path.exists() {
        workspace.join(format!("{}_{}", prefix, filename))
    } else {
        path
    }
}

fn store_upload(path: &Path, bytes: &[u8]) -> Result<()> {
    let store_error = |e: std::io::Error| {
        LitehouseError::RegistrationError(format!("Failed to store {}: {}", path.display(), e))
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(store_error)?;
    file.write_all(bytes).map_err(store_error)
}

/// Persist an upload into `workspace` and expose it through `reader`.
///
/// The file stays on disk if the engine rejects it; the registry is only
/// updated on success. Callers must serialize this with every other statement
/// on the same connection.
pub fn register_file(
    reader: &DuckDBReader,
    tables: &RwLock<TableRegistry>,
    workspace: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<TableMeta> {
    let filename = sanitize_filename(filename)?;
    let kind = FileKind::from_filename(&filename)?;

    let (name, db) = tables
        .read()
        .map_err(|e| LitehouseError::InternalError(format!("Table registry poisoned: {}", e)))?
        .allocate(kind);

    let path = storage_path(workspace, &filename, db.as_deref().unwrap_or(&name));
    store_upload(&path, bytes)?;

    match (kind.scan_function(), &db) {
        (Some(scan_function), _) => reader.create_file_view(&name, scan_function, &path)?,
        (None, Some(alias)) => {
            let db_type = is_sqlite_database(bytes).then_some("sqlite");
            reader.attach_database(&path, alias, db_type)?
        }
        (None, None) => {
            return Err(LitehouseError::InternalError(format!(
                "No registration strategy for {} files",
                kind
            )))
        }
    }

    let table = TableMeta {
        name,
        kind,
        path,
        db,
    };
    tables
        .write()
        .map_err(|e| LitehouseError::InternalError(format!("Table registry poisoned: {}", e)))?
        .insert(table.clone())?;

    info!("Registered {} as {} table '{}'", filename, kind, table.name);
    Ok(table)
}
