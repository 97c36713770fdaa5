//! Runtime configuration shared by the session manager and the query pipeline.
//!
//! The binaries populate a [`Config`] from their command line arguments; tests
//! usually start from [`Config::default`] and shorten the deadlines.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for sessions, registration and query execution
#[derive(Debug, Clone)]
pub struct Config {
    /// Parent directory for per-session workspace directories
    pub workspace_root: PathBuf,
    /// Deadline for the schema probe, the data statement and DESCRIBE
    pub query_timeout: Duration,
    /// Deadline for the best-effort row count
    pub count_timeout: Duration,
    /// Deadline for writing an upload and creating its view or attachment
    pub registration_timeout: Duration,
    /// Upper bound for a requested page size (0 = unlimited)
    pub max_rows: usize,
    /// Sessions idle for longer than this are reaped (zero = never)
    pub session_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            query_timeout: Duration::from_secs(30),
            count_timeout: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(60),
            max_rows: 10_000,
            session_idle_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    /// Clamp a requested page size to `max_rows`
    pub fn clamp_limit(&self, limit: usize) -> usize {
        if self.max_rows > 0 && limit > self.max_rows {
            self.max_rows
        } else {
            limit
        }
    }
}
