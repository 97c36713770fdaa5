//! Timeout-bounded statement execution and the query pipeline.
//!
//! DuckDB calls are synchronous, so every statement runs on the blocking pool
//! while the caller races it against a deadline. The session connection sits
//! behind an async mutex and the blocking task owns the lock guard for as long
//! as the engine call runs. When the deadline fires the caller gets
//! [`LitehouseError::QueryTimeout`] right away, the engine call is interrupted,
//! and the next statement on that session waits until the abandoned call has
//! actually returned. Concurrent requests on one session therefore queue; they
//! never share the connection.
//!
//! A query request runs up to three statements (see [`crate::compose`]):
//! the schema probe and the data page are fatal on failure, the row count is
//! best-effort and uses its own, shorter deadline.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compose::QueryPlan;
use crate::config::Config;
use crate::reader::{ColumnInfo, DuckDBReader, QueryOutput};
use crate::session::Session;
use crate::validate::QuerySpec;
use crate::{LitehouseError, Result};

/// A session connection; `None` once the session has been closed
pub type SharedReader = Arc<tokio::sync::Mutex<Option<DuckDBReader>>>;

/// Result of a query request
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Total row count, absent when counting failed or timed out
    pub total_est: Option<u64>,
    pub duration_ms: f64,
}

/// Run `f` against the connection with exclusive access, bounded by `deadline`.
///
/// The deadline covers both waiting for the connection and the call itself.
pub async fn execute_with_deadline<T, F>(engine: &SharedReader, deadline: Duration, f: F) -> Result<T>
where
    F: FnOnce(&DuckDBReader) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let started = Instant::now();

    let guard = tokio::time::timeout(deadline, Arc::clone(engine).lock_owned())
        .await
        .map_err(|_| {
            warn!("Timed out after {:?} waiting for the session connection", deadline);
            LitehouseError::query_timeout(deadline)
        })?;

    let interrupt = match (*guard).as_ref() {
        Some(reader) => reader.interrupt_handle(),
        None => return Err(closed_connection()),
    };

    // cleared by the task before it gives the connection back
    let running = Arc::new(Mutex::new(true));
    let task_running = Arc::clone(&running);

    let task = tokio::task::spawn_blocking(move || {
        let result = match (*guard).as_ref() {
            Some(reader) => f(reader),
            None => Err(closed_connection()),
        };
        if let Ok(mut flag) = task_running.lock() {
            *flag = false;
        }
        drop(guard);
        result
    });

    let remaining = deadline.saturating_sub(started.elapsed());
    match tokio::time::timeout(remaining, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(LitehouseError::InternalError(format!(
            "Statement task failed: {}",
            e
        ))),
        Err(_) => {
            if let Ok(flag) = running.lock() {
                if *flag {
                    interrupt.interrupt();
                }
            }
            warn!("Statement exceeded {:?}, interrupting", deadline);
            Err(LitehouseError::query_timeout(deadline))
        }
    }
}

/// Execute a single statement and collect its output
pub async fn execute_statement(
    engine: &SharedReader,
    sql: String,
    deadline: Duration,
) -> Result<QueryOutput> {
    execute_with_deadline(engine, deadline, move |reader| reader.execute_sql(&sql)).await
}

fn closed_connection() -> LitehouseError {
    LitehouseError::InternalError("Session connection is closed".to_string())
}

/// Run a validated query against a session: schema probe, data page, count.
pub async fn run_query(session: &Session, spec: &QuerySpec, config: &Config) -> Result<QueryResponse> {
    let started = Instant::now();
    session.touch();

    let plan = QueryPlan::new(&spec.sql, config.clamp_limit(spec.limit), spec.offset);
    let engine = session.engine();

    info!(
        "Executing query on session {}: {} chars",
        session.id(),
        spec.sql.len()
    );

    let schema = execute_statement(engine, plan.schema_sql, config.query_timeout).await?;
    let data = execute_statement(engine, plan.data_sql, config.query_timeout).await?;

    let total_est = match execute_statement(engine, plan.count_sql, config.count_timeout).await {
        Ok(output) => output.scalar().and_then(|v| v.as_u64()),
        Err(e) => {
            debug!("Row count estimate unavailable: {}", e);
            None
        }
    };

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        "Query returned {} rows in {:.1}ms",
        data.rows.len(),
        duration_ms
    );

    Ok(QueryResponse {
        columns: schema.columns,
        rows: data.rows,
        total_est,
        duration_ms,
    })
}
