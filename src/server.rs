//! HTTP API for the station explorer

use crate::config::Config;
use crate::db::{Record, RecordStore};
use crate::filter::FilterRequest;
use crate::query_compiler::{SearchQueryCompiler, DEFAULT_LIMIT, MAX_LIMIT};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Local, SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

const SEARCH_BODY_LIMIT: usize = 1024 * 1024;
const DASHBOARD_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    compiler: Arc<SearchQueryCompiler>,
    store: Arc<dyn RecordStore>,
    database_host: Arc<str>,
    database_name: Arc<str>,
    dashboard_data_file: Arc<PathBuf>,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> Self {
        Self {
            compiler: Arc::new(SearchQueryCompiler::from_catalog(config.query.clone())),
            store,
            database_host: Arc::from(config.database.host.as_str()),
            database_name: Arc::from(config.database.name.as_str()),
            dashboard_data_file: Arc::new(config.server.dashboard_data_file.clone()),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    message: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct ConfigResponse {
    server: String,
    database: String,
}

#[derive(Serialize)]
struct CatalogEntry {
    key: String,
    label: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FiltersResponse {
    stations: Vec<CatalogEntry>,
    presets: Vec<CatalogEntry>,
    default_limit: i64,
    max_limit: i64,
}

#[derive(Serialize)]
struct SearchResponse {
    count: usize,
    data: Vec<Record>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn error_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/config", get(connection_config))
        .route("/api/filters", get(filters))
        .route(
            "/api/search",
            post(search).layer(DefaultBodyLimit::max(SEARCH_BODY_LIMIT)),
        )
        .route(
            "/api/production-dashboard-data",
            post(update_dashboard_data).layer(DefaultBodyLimit::max(DASHBOARD_BODY_LIMIT)),
        )
        .with_state(state)
}

/// Serve until ctrl-c
pub async fn run(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    info!("TS70 explorer listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        message: "TS70 station explorer ready",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

async fn connection_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        server: state.database_host.to_string(),
        database: state.database_name.to_string(),
    })
}

async fn filters(State(state): State<AppState>) -> Json<FiltersResponse> {
    let catalog = state.compiler.catalog();
    Json(FiltersResponse {
        stations: catalog
            .stations
            .iter()
            .map(|s| CatalogEntry {
                key: s.key.clone(),
                label: s.label.clone(),
            })
            .collect(),
        presets: catalog
            .presets
            .iter()
            .map(|p| CatalogEntry {
                key: p.key.clone(),
                label: p.label.clone(),
            })
            .collect(),
        default_limit: DEFAULT_LIMIT,
        max_limit: MAX_LIMIT,
    })
}

async fn search(State(state): State<AppState>, Json(request): Json<FilterRequest>) -> Response {
    // the relation is fixed by configuration for HTTP clients
    let request = FilterRequest {
        table_schema: None,
        table_name: None,
        ..request
    };
    let descriptor = state.compiler.build_search_query(&request, &Local::now());

    match state.store.fetch(&descriptor).await {
        Ok(data) => {
            info!(rows = data.len(), "Search completed");
            Json(SearchResponse {
                count: data.len(),
                data,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Search request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Unable to execute search")
        }
    }
}

async fn update_dashboard_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    match store_dashboard_payload(&state.dashboard_data_file, content_type, &body).await {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(DashboardError::Empty) => error_response(StatusCode::BAD_REQUEST, "Empty payload"),
        Err(DashboardError::InvalidJson) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid JSON payload")
        }
        Err(DashboardError::Io(e)) => {
            error!(error = %e, "Dashboard data update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Unable to update data file")
        }
    }
}

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("empty payload")]
    Empty,

    #[error("invalid JSON payload")]
    InvalidJson,

    #[error("failed to write data file: {0}")]
    Io(#[from] std::io::Error),
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// Validate a dashboard snapshot and replace `path` with it atomically.
///
/// JSON bodies sent with a JSON content type are stored pretty-printed; any other
/// body is stored as trimmed text, validated as JSON when it looks like JSON.
pub async fn store_dashboard_payload(
    path: &Path,
    content_type: Option<&str>,
    body: &str,
) -> Result<(), DashboardError> {
    let raw = body.trim();
    if raw.is_empty() {
        return Err(DashboardError::Empty);
    }

    let mut content = if content_type.is_some_and(is_json_content_type) {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| DashboardError::InvalidJson)?;
        serde_json::to_string_pretty(&value).map_err(|_| DashboardError::InvalidJson)?
    } else {
        if raw.starts_with('{') || raw.starts_with('[') {
            serde_json::from_str::<serde::de::IgnoredAny>(raw)
                .map_err(|_| DashboardError::InvalidJson)?;
        }
        raw.to_string()
    };
    if !content.ends_with('\n') {
        content.push('\n');
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    tokio::fs::write(&temp, content).await?;
    tokio::fs::rename(&temp, path).await?;

    info!(path = %path.display(), "Dashboard data updated");
    Ok(())
}
