//! Session management
//!
//! Sessions provide isolation for uploaded tables. Each session:
//! - Has a unique UUID
//! - Owns one in-memory DuckDB connection, used by one statement at a time
//! - Owns a scratch directory holding its uploaded files
//! - Tracks the tables registered through it
//! - Has a last-activity timestamp for idle cleanup
//!
//! The [`SessionManager`] is created once per process and handed to request
//! handlers; [`SessionManager::shutdown`] closes whatever is still open.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use ::duckdb::InterruptHandle;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::execute::{execute_with_deadline, run_query, QueryResponse, SharedReader};
use crate::reader::{ColumnInfo, DuckDBReader};
use crate::registry::{register_file, sanitize_filename, FileKind, TableMeta, TableRegistry};
use crate::validate::QuerySpec;
use crate::{LitehouseError, Result};

/// An isolated analytical workspace
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    workspace: TempDir,
    engine: SharedReader,
    interrupt: Arc<InterruptHandle>,
    tables: Arc<RwLock<TableRegistry>>,
    last_activity: Mutex<Instant>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("workspace", &self.workspace.path())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with a fresh connection and a workspace under `workspace_root`
    pub fn new(workspace_root: &Path) -> Result<Self> {
        let id = Uuid::new_v4().to_string();

        std::fs::create_dir_all(workspace_root).map_err(|e| {
            LitehouseError::InternalError(format!(
                "Failed to create workspace root {}: {}",
                workspace_root.display(),
                e
            ))
        })?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("litehouse_{}_", &id[..8]))
            .tempdir_in(workspace_root)
            .map_err(|e| {
                LitehouseError::InternalError(format!("Failed to create workspace: {}", e))
            })?;

        let reader = DuckDBReader::from_connection_string("duckdb://memory")?;
        let interrupt = reader.interrupt_handle();

        Ok(Self {
            id,
            created_at: Utc::now(),
            workspace,
            engine: Arc::new(tokio::sync::Mutex::new(Some(reader))),
            interrupt,
            tables: Arc::new(RwLock::new(TableRegistry::new())),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn workspace_dir(&self) -> &Path {
        self.workspace.path()
    }

    pub(crate) fn engine(&self) -> &SharedReader {
        &self.engine
    }

    /// Registered tables in registration order
    pub fn tables(&self) -> Result<Vec<TableMeta>> {
        Ok(self.registry()?.list().to_vec())
    }

    pub fn table(&self, name: &str) -> Result<Option<TableMeta>> {
        Ok(self.registry()?.get(name).cloned())
    }

    fn registry(&self) -> Result<std::sync::RwLockReadGuard<'_, TableRegistry>> {
        self.tables
            .read()
            .map_err(|e| LitehouseError::InternalError(format!("Table registry poisoned: {}", e)))
    }

    /// Store an upload in the workspace and register it as a table.
    ///
    /// Unsupported extensions fail before anything is written.
    pub async fn register(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<TableMeta> {
        self.touch();
        let filename = sanitize_filename(filename)?;
        FileKind::from_filename(&filename)?;

        let tables = Arc::clone(&self.tables);
        let workspace = self.workspace.path().to_path_buf();

        execute_with_deadline(&self.engine, timeout, move |reader| {
            register_file(reader, &tables, &workspace, &filename, &bytes)
        })
        .await
        .map_err(|e| match e {
            LitehouseError::QueryTimeout { timeout_ms } => LitehouseError::RegistrationError(
                format!("Registration timed out after {}ms", timeout_ms),
            ),
            other => other,
        })
    }

    /// Column names and engine types of a registered table
    pub async fn describe(&self, table: &str, timeout: Duration) -> Result<Vec<ColumnInfo>> {
        self.touch();
        if self.table(table)?.is_none() {
            return Err(LitehouseError::TableNotFound(table.to_string()));
        }

        let table = table.to_string();
        execute_with_deadline(&self.engine, timeout, move |reader| reader.describe(&table)).await
    }

    pub async fn query(&self, spec: &QuerySpec, config: &Config) -> Result<QueryResponse> {
        run_query(self, spec, config).await
    }

    /// Update last activity timestamp
    pub fn touch(&self) {
        if let Ok(mut last_activity) = self.last_activity.lock() {
            *last_activity = Instant::now();
        }
    }

    /// Check if session has been idle longer than `timeout` (zero never expires)
    pub fn is_expired(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return false;
        }
        self.last_activity
            .lock()
            .map(|last| last.elapsed() > timeout)
            .unwrap_or(false)
    }

    /// Interrupt any running statement, close the connection and delete the workspace.
    pub async fn close(&self) -> Result<()> {
        self.interrupt.interrupt();

        // waits for an abandoned statement to hand the connection back
        let reader = self.engine.lock().await.take();
        drop(reader);

        let workspace = self.workspace.path();
        if workspace.exists() {
            std::fs::remove_dir_all(workspace).map_err(|e| {
                LitehouseError::InternalError(format!(
                    "Failed to remove workspace {}: {}",
                    workspace.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// Manages all active sessions
pub struct SessionManager {
    /// Active sessions indexed by session ID
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    config: Config,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a new session
    pub fn create(&self) -> Result<Arc<Session>> {
        let session = Arc::new(Session::new(&self.config.workspace_root)?);
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(session.id().to_string(), Arc::clone(&session));

        info!(
            "Created session {} (workspace {})",
            session.id(),
            session.workspace_dir().display()
        );
        Ok(session)
    }

    /// Get a session by ID, updating its last activity
    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .map_err(poisoned)?
            .get(id)
            .cloned()
            .ok_or_else(|| LitehouseError::SessionNotFound(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Close and forget a session; `false` if the ID is unknown
    pub async fn destroy(&self, id: &str) -> Result<bool> {
        let removed = self.sessions.write().map_err(poisoned)?.remove(id);
        match removed {
            Some(session) => {
                session.close().await?;
                info!("Destroyed session {}", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// IDs of sessions idle for longer than the configured timeout
    pub fn expired_sessions(&self) -> Result<Vec<String>> {
        let timeout = self.config.session_idle_timeout;
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|s| s.is_expired(timeout))
            .map(|s| s.id().to_string())
            .collect())
    }

    /// Destroy every expired session, returning how many were removed
    pub async fn reap_expired(&self) -> Result<usize> {
        let mut reaped = 0;
        for id in self.expired_sessions()? {
            if self.destroy(&id).await? {
                info!("Reaped idle session {}", id);
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Close every live session
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = match self.sessions.write() {
            Ok(mut sessions) => sessions.drain().map(|(_, s)| s).collect(),
            Err(e) => {
                warn!("Session map poisoned during shutdown: {}", e);
                return;
            }
        };

        info!("Closing {} session(s)", drained.len());
        for session in drained {
            if let Err(e) = session.close().await {
                warn!("Failed to close session {}: {}", session.id(), e);
            }
        }
    }

    /// Check if a session exists
    pub fn session_exists(&self, id: &str) -> bool {
        self.sessions
            .read()
            .map(|sessions| sessions.contains_key(id))
            .unwrap_or(false)
    }

    /// Get session count (for health check)
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> LitehouseError {
    LitehouseError::InternalError(format!("Session map poisoned: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const PEOPLE_CSV: &[u8] = b"id,name,age,city\n1,Alice,25,New York\n2,Bob,30,San Francisco\n3,Charlie,35,Chicago\n";

    fn manager(root: &Path) -> SessionManager {
        SessionManager::new(Config {
            workspace_root: root.to_path_buf(),
            ..Config::default()
        })
    }

    #[test]
    fn test_session_creation() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new(root.path()).unwrap();
        assert!(!session.id().is_empty());
        assert!(session.tables().unwrap().is_empty());
        assert!(session.workspace_dir().starts_with(root.path()));
        assert!(session.workspace_dir().is_dir());
        assert!(session.created_at() <= Utc::now());
    }

    #[test]
    fn test_session_ids_unique() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.workspace_dir(), b.workspace_dir());
        assert_eq!(manager.session_count(), 2);
    }

    #[tokio::test]
    async fn test_session_manager_create_destroy() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        let session = manager.create().unwrap();
        let id = session.id().to_string();
        let workspace = session.workspace_dir().to_path_buf();
        assert!(manager.session_exists(&id));

        session.register("people.csv", PEOPLE_CSV.to_vec(), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(workspace.join("people.csv").exists());

        assert!(manager.destroy(&id).await.unwrap());
        assert!(!manager.session_exists(&id));
        assert!(!workspace.exists());
        assert!(matches!(
            manager.get(&id),
            Err(LitehouseError::SessionNotFound(_))
        ));

        assert!(!manager.destroy(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_statements() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        let session = manager.create().unwrap();
        manager.destroy(session.id()).await.unwrap();

        let spec = QuerySpec::new("SELECT 1", 10, 0).unwrap();
        assert!(session.query(&spec, manager.config()).await.is_err());
    }

    #[tokio::test]
    async fn test_register_and_list_tables() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new(root.path()).unwrap();

        for _ in 0..3 {
            session
                .register("people.csv", PEOPLE_CSV.to_vec(), Duration::from_secs(30))
                .await
                .unwrap();
        }

        let tables = session.tables().unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["csv_1", "csv_2", "csv_3"]);

        // each upload keeps its own file
        assert_eq!(tables[0].path, session.workspace_dir().join("people.csv"));
        assert_eq!(tables[2].path, session.workspace_dir().join("csv_3_people.csv"));
        let config = Config::default();
        for table in &tables {
            let spec = QuerySpec::new(&format!("SELECT * FROM {}", table.name), 10, 0).unwrap();
            assert_eq!(session.query(&spec, &config).await.unwrap().total_est, Some(3));
        }
    }

    fn sqlite_fixture(dir: &Path) -> Vec<u8> {
        let path = dir.join("fixture.sqlite");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE \"main\" (id INTEGER, label TEXT);
             INSERT INTO \"main\" VALUES (1, 'one'), (2, 'two'), (3, 'three');",
        )
        .unwrap();
        drop(conn);
        std::fs::read(path).unwrap()
    }

    fn sqlite_extension_available() -> bool {
        let conn = ::duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch("LOAD sqlite").is_ok()
            || conn.execute_batch("INSTALL sqlite; LOAD sqlite;").is_ok()
    }

    #[tokio::test]
    async fn test_register_sqlite_database() {
        let root = tempfile::tempdir().unwrap();
        let fixtures = tempfile::tempdir().unwrap();
        let bytes = sqlite_fixture(fixtures.path());
        let session = Session::new(root.path()).unwrap();

        let registered = session
            .register("shop.sqlite", bytes, Duration::from_secs(60))
            .await;

        if !sqlite_extension_available() {
            // without DuckDB's sqlite extension the attach fails cleanly
            assert!(matches!(registered, Err(LitehouseError::RegistrationError(_))));
            assert!(session.tables().unwrap().is_empty());
            return;
        }

        let table = registered.unwrap();
        assert_eq!(table.name, "db_1.main");
        assert_eq!(table.kind, FileKind::Sqlite);
        assert_eq!(table.db.as_deref(), Some("db_1"));

        let columns = session.describe("db_1.main", Duration::from_secs(30)).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "label"]);
        assert_eq!(columns[1].column_type, "VARCHAR");

        let spec = QuerySpec::new("SELECT label FROM db_1.main ORDER BY id", 2, 0).unwrap();
        let response = session.query(&spec, &Config::default()).await.unwrap();
        assert_eq!(
            response.rows,
            vec![vec![serde_json::json!("one")], vec![serde_json::json!("two")]]
        );
        assert_eq!(response.total_est, Some(3));
    }

    #[tokio::test]
    async fn test_register_unsupported_kind() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new(root.path()).unwrap();

        let err = session
            .register("notes.txt", b"hello".to_vec(), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, LitehouseError::UnsupportedFileKind(_)));
        assert!(session.tables().unwrap().is_empty());
        assert!(!session.workspace_dir().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_describe_registered_table() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new(root.path()).unwrap();
        let table = session
            .register("people.csv", PEOPLE_CSV.to_vec(), Duration::from_secs(30))
            .await
            .unwrap();

        let columns = session.describe(&table.name, Duration::from_secs(30)).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "age", "city"]);
        assert_eq!(columns[0].column_type, "BIGINT");
        assert_eq!(columns[1].column_type, "VARCHAR");
    }

    #[tokio::test]
    async fn test_describe_is_scoped_to_session() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        let owner = manager.create().unwrap();
        let other = manager.create().unwrap();

        owner
            .register("people.csv", PEOPLE_CSV.to_vec(), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(owner.describe("csv_1", Duration::from_secs(30)).await.is_ok());
        assert!(matches!(
            other.describe("csv_1", Duration::from_secs(30)).await,
            Err(LitehouseError::TableNotFound(_))
        ));

        // the other connection never sees the view either
        let spec = QuerySpec::new("SELECT * FROM csv_1", 10, 0).unwrap();
        assert!(matches!(
            other.query(&spec, manager.config()).await,
            Err(LitehouseError::ExecutionError(_))
        ));
    }

    #[tokio::test]
    async fn test_session_expiry() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(Config {
            workspace_root: root.path().to_path_buf(),
            session_idle_timeout: Duration::from_millis(1),
            ..Config::default()
        });
        let id = manager.create().unwrap().id().to_string();

        sleep(Duration::from_millis(10));

        assert_eq!(manager.expired_sessions().unwrap(), vec![id.clone()]);
        assert_eq!(manager.reap_expired().await.unwrap(), 1);
        assert!(!manager.session_exists(&id));
    }

    #[test]
    fn test_zero_idle_timeout_never_expires() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new(root.path()).unwrap();
        sleep(Duration::from_millis(5));
        assert!(!session.is_expired(Duration::ZERO));
        assert!(session.is_expired(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        let workspaces: Vec<_> = (0..3)
            .map(|_| manager.create().unwrap().workspace_dir().to_path_buf())
            .collect();

        manager.shutdown().await;

        assert_eq!(manager.session_count(), 0);
        assert!(workspaces.iter().all(|w| !w.exists()));
    }
}
