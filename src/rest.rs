/*!
LiteHouse REST API Server

Provides session-scoped HTTP endpoints for uploading data files and running
read-only SQL against them.

## Usage

```bash
litehouse-rest --host 127.0.0.1 --port 8000
```

## Endpoints

- `POST   /api/v1/session` - Create a session (returns `session_id`)
- `DELETE /api/v1/session` - Destroy the session named by `X-Session-Id`
- `POST   /api/v1/upload`  - Upload a data file (multipart field `file`)
- `GET    /api/v1/tables`  - List registered tables
- `GET    /api/v1/schema?table=<name>` - Columns of a registered table
- `POST   /api/v1/query`   - Execute a paginated read-only query
- `GET    /api/v1/health`  - Health check
- `GET    /api/v1/version` - Version information

Session-scoped endpoints require the `X-Session-Id` header.
*/

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use litehouse::{
    ColumnInfo, Config, FileKind, LitehouseError, QueryResponse, QuerySpec, Session,
    SessionManager, TableMeta, VERSION,
};

const SESSION_HEADER: &str = "x-session-id";

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "litehouse-rest")]
#[command(about = "LiteHouse REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "8000")]
    port: u16,

    /// CORS allowed origins (comma-separated, `*` for any)
    #[arg(long, default_value = "http://localhost:3000,http://127.0.0.1:3000")]
    cors_origin: String,

    /// Parent directory for session workspaces (defaults to the OS temp dir)
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Deadline for schema probe, data statement and DESCRIBE, in seconds
    #[arg(long, default_value = "30")]
    query_timeout_secs: u64,

    /// Deadline for the row count estimate, in seconds
    #[arg(long, default_value = "5")]
    count_timeout_secs: u64,

    /// Deadline for registering an upload, in seconds
    #[arg(long, default_value = "60")]
    registration_timeout_secs: u64,

    /// Maximum page size accepted by /api/v1/query (0 = unlimited)
    #[arg(long, default_value = "10000")]
    max_rows: usize,

    /// Destroy sessions idle for this many minutes (0 = never)
    #[arg(long, default_value = "60")]
    session_idle_minutes: u64,

    /// Maximum upload size in megabytes
    #[arg(long, default_value = "512")]
    max_upload_mb: usize,
}

impl Cli {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or(defaults.workspace_root),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            count_timeout: Duration::from_secs(self.count_timeout_secs),
            registration_timeout: Duration::from_secs(self.registration_timeout_secs),
            max_rows: self.max_rows,
            session_idle_timeout: Duration::from_secs(self.session_idle_minutes * 60),
        }
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionManager>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for /api/v1/query endpoint
#[derive(Debug, Deserialize)]
struct QueryRequest {
    /// SQL query to execute
    sql: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

/// Query string for /api/v1/schema endpoint
#[derive(Debug, Deserialize)]
struct SchemaParams {
    table: String,
}

/// Successful API response
#[derive(Debug, Serialize)]
struct ApiSuccess<T> {
    status: String,
    data: T,
}

impl<T> ApiSuccess<T> {
    fn new(data: T) -> Json<Self> {
        Json(ApiSuccess {
            status: "success".to_string(),
            data,
        })
    }
}

/// Error API response
#[derive(Debug, Serialize)]
struct ApiError {
    status: String,
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
struct SessionResult {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct UploadResult {
    name: String,
    kind: FileKind,
}

/// Table listing entry; the stored path stays server-side
#[derive(Debug, Serialize)]
struct TableInfo {
    name: String,
    kind: FileKind,
    db: Option<String>,
}

impl From<TableMeta> for TableInfo {
    fn from(meta: TableMeta) -> Self {
        TableInfo {
            name: meta.name,
            kind: meta.kind,
            db: meta.db,
        }
    }
}

#[derive(Debug, Serialize)]
struct SchemaResult {
    table: String,
    columns: Vec<ColumnInfo>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    sessions: usize,
}

/// Version response
#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
    formats: Vec<String>,
}

// ============================================================================
// Error Handling
// ============================================================================

/// Custom error type for API responses
struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error_type: &str, message: String) -> Self {
        ApiErrorResponse {
            status,
            error: ApiError {
                status: "error".to_string(),
                error: ErrorDetails {
                    message,
                    error_type: error_type.to_string(),
                },
            },
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let json = Json(self.error);
        (self.status, json).into_response()
    }
}

impl From<LitehouseError> for ApiErrorResponse {
    fn from(err: LitehouseError) -> Self {
        let (status, error_type) = match &err {
            LitehouseError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "InvalidQuery"),
            LitehouseError::UnsupportedFileKind(_) => {
                (StatusCode::BAD_REQUEST, "UnsupportedFileKind")
            }
            LitehouseError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SessionNotFound"),
            LitehouseError::TableNotFound(_) => (StatusCode::NOT_FOUND, "TableNotFound"),
            LitehouseError::QueryTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "QueryTimeout"),
            LitehouseError::ExecutionError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ExecutionError")
            }
            LitehouseError::RegistrationError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "RegistrationError")
            }
            LitehouseError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        ApiErrorResponse::new(status, error_type, err.to_string())
    }
}

impl From<String> for ApiErrorResponse {
    fn from(msg: String) -> Self {
        ApiErrorResponse::new(StatusCode::BAD_REQUEST, "BadRequest", msg)
    }
}

impl From<JsonRejection> for ApiErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        ApiErrorResponse::from(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiErrorResponse {
    fn from(rejection: QueryRejection) -> Self {
        ApiErrorResponse::from(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiErrorResponse {
    fn from(rejection: MultipartRejection) -> Self {
        ApiErrorResponse::from(rejection.body_text())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn session_id(headers: &HeaderMap) -> Result<String, ApiErrorResponse> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiErrorResponse::from("X-Session-Id header required".to_string()))
}

/// Resolve the session named by the request headers
fn session_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<Session>, ApiErrorResponse> {
    let id = session_id(headers)?;
    Ok(state.sessions.get(&id)?)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let headers = vec![header::CONTENT_TYPE, HeaderName::from_static(SESSION_HEADER)];
    if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(headers)
    } else {
        let origins: Vec<_> = cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(headers)
    }
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route(
            "/api/v1/session",
            post(create_session_handler).delete(delete_session_handler),
        )
        .route("/api/v1/upload", post(upload_handler))
        .route("/api/v1/tables", get(tables_handler))
        .route("/api/v1/schema", get(schema_handler))
        .route("/api/v1/query", post(query_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/version", get(version_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Periodically destroy idle sessions
async fn reap_idle_sessions(sessions: Arc<SessionManager>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        match sessions.reap_expired().await {
            Ok(0) => {}
            Ok(n) => info!("Reaped {} idle session(s)", n),
            Err(e) => warn!("Session reaper failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Handler Functions
// ============================================================================

/// POST /api/v1/session - Create a session
async fn create_session_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiSuccess<SessionResult>>, ApiErrorResponse> {
    let session = state.sessions.create()?;
    Ok(ApiSuccess::new(SessionResult {
        session_id: session.id().to_string(),
    }))
}

/// DELETE /api/v1/session - Destroy a session and its workspace
async fn delete_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiSuccess<SessionResult>>, ApiErrorResponse> {
    let id = session_id(&headers)?;
    if !state.sessions.destroy(&id).await? {
        return Err(LitehouseError::SessionNotFound(id).into());
    }
    Ok(ApiSuccess::new(SessionResult { session_id: id }))
}

/// POST /api/v1/upload - Store a file and register it as a table
async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiSuccess<UploadResult>>, ApiErrorResponse> {
    let session = session_from_headers(&state, &headers)?;
    let mut multipart = multipart?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Invalid multipart body: {}", e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| "No filename provided".to_string())?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("Failed to read upload: {}", e))?;

        info!(
            "Uploading {} ({} bytes) to session {}",
            filename,
            bytes.len(),
            session.id()
        );
        let table = session
            .register(
                &filename,
                bytes.to_vec(),
                state.sessions.config().registration_timeout,
            )
            .await?;

        return Ok(ApiSuccess::new(UploadResult {
            name: table.name,
            kind: table.kind,
        }));
    }

    Err("Missing multipart field 'file'".to_string().into())
}

/// GET /api/v1/tables - Registered tables in registration order
async fn tables_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiSuccess<Vec<TableInfo>>>, ApiErrorResponse> {
    let session = session_from_headers(&state, &headers)?;
    let tables = session.tables()?.into_iter().map(TableInfo::from).collect();
    Ok(ApiSuccess::new(tables))
}

/// GET /api/v1/schema - Columns of one registered table
async fn schema_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<SchemaParams>, QueryRejection>,
) -> Result<Json<ApiSuccess<SchemaResult>>, ApiErrorResponse> {
    let session = session_from_headers(&state, &headers)?;
    let Query(params) = params?;
    let columns = session
        .describe(&params.table, state.sessions.config().query_timeout)
        .await?;
    Ok(ApiSuccess::new(SchemaResult {
        table: params.table,
        columns,
    }))
}

/// POST /api/v1/query - Validate, paginate and execute a query
async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<ApiSuccess<QueryResponse>>, ApiErrorResponse> {
    let session = session_from_headers(&state, &headers)?;
    let Json(request) = payload?;
    info!(
        "Executing query: {} chars (limit {}, offset {})",
        request.sql.len(),
        request.limit,
        request.offset
    );

    let spec = QuerySpec::new(&request.sql, request.limit, request.offset)?;
    let response = session.query(&spec, state.sessions.config()).await?;
    Ok(ApiSuccess::new(response))
}

/// GET /api/v1/health - Health check
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
        sessions: state.sessions.session_count(),
    })
}

/// GET /api/v1/version - Version information
async fn version_handler() -> Json<VersionResponse> {
    let formats = [
        FileKind::Csv,
        FileKind::Parquet,
        FileKind::Json,
        FileKind::Sqlite,
    ]
    .iter()
    .map(|k| k.to_string())
    .collect();

    Json(VersionResponse {
        version: VERSION.to_string(),
        formats,
    })
}

/// Root handler
async fn root_handler() -> &'static str {
    "LiteHouse REST API Server - See /api/v1/health for status"
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "litehouse_rest=info,litehouse=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    info!(
        "Session workspaces under {}",
        config.workspace_root.display()
    );

    let sessions = Arc::new(SessionManager::new(config));
    let state = AppState {
        sessions: Arc::clone(&sessions),
    };

    if !sessions.config().session_idle_timeout.is_zero() {
        tokio::spawn(reap_idle_sessions(Arc::clone(&sessions)));
    }

    let app = build_router(state, cli.max_upload_mb * 1024 * 1024)
        .layer(cors_layer(&cli.cors_origin))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    info!("Starting LiteHouse REST API server on {}", addr);
    info!("API documentation:");
    info!("  POST   /api/v1/session - Create session");
    info!("  DELETE /api/v1/session - Destroy session");
    info!("  POST   /api/v1/upload  - Upload data file");
    info!("  GET    /api/v1/tables  - List tables");
    info!("  GET    /api/v1/schema  - Table schema");
    info!("  POST   /api/v1/query   - Execute query");
    info!("  GET    /api/v1/health  - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    Ok(())
}
