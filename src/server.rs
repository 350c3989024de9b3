//! Query Service: the HTTP surface over the record store.
//!
//! This is the only network-reachable component. The pipeline persists
//! through it like any other client, so validation and idempotence are
//! applied uniformly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/gazettes/` | List records; optional `year` + `month` filter, `skip`/`limit` paging |
//! | `POST` | `/api/gazettes/` | Idempotent create; 201 when inserted, 200 when already present |
//! | `GET`  | `/api/gazettes/{id}` | Fetch one record |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Both month and year must be provided for filtering." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `store_unavailable` (503), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::errors::StoreError;
use crate::models::{CreateOutcome, GazetteRecord, NewGazette, Page};
use crate::period::YearMonth;
use crate::store::SqliteGazetteStore;
use crate::traits::GazetteStore;

/// Shared state handed to every handler.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn GazetteStore>,
}

/// Open the configured store and serve on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = SqliteGazetteStore::open(config).await?;
    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "query service listening");
    serve(listener, Arc::new(store)).await
}

/// Serve the API on an already-bound listener.
pub async fn serve(listener: TcpListener, store: Arc<dyn GazetteStore>) -> anyhow::Result<()> {
    axum::serve(listener, router(store)).await?;
    Ok(())
}

/// Build the router without binding, for embedding or tests.
pub fn router(store: Arc<dyn GazetteStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/gazettes/",
            get(handle_list_gazettes).post(handle_create_gazette),
        )
        .route(
            "/api/gazettes",
            get(handle_list_gazettes).post(handle_create_gazette),
        )
        .route("/api/gazettes/{id}", get(handle_get_gazette))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { store })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidFilter(msg) => bad_request(msg),
            StoreError::Unavailable(e) => {
                tracing::error!(error = %e, "record store failure");
                AppError {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    code: "store_unavailable",
                    message: "record store unavailable".to_string(),
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/gazettes/ ============

/// Parse an optional query parameter, rejecting malformed values with 400.
fn parse_param<T: FromStr>(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, AppError> {
    match params.get(name).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| bad_request(format!("{} must be an integer, got '{}'", name, raw))),
    }
}

/// Validates the filter before the store is touched: partial or out-of-range
/// filters never reach it.
async fn handle_list_gazettes(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<GazetteRecord>>, AppError> {
    let year = parse_param::<i32>(&params, "year")?;
    let month = parse_param::<u32>(&params, "month")?;
    let filter = YearMonth::from_parts(year, month)?;

    let skip = parse_param::<i64>(&params, "skip")?.unwrap_or(0);
    let limit = parse_param::<i64>(&params, "limit")?;
    if skip < 0 {
        return Err(bad_request("skip must be >= 0"));
    }
    if matches!(limit, Some(l) if l < 0) {
        return Err(bad_request("limit must be >= 0"));
    }

    let records = state.store.list(filter, Page { skip, limit }).await?;
    Ok(Json(records))
}

// ============ POST /api/gazettes/ ============

async fn handle_create_gazette(
    State(state): State<AppState>,
    payload: Result<Json<NewGazette>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOutcome>), AppError> {
    let Json(new) = payload.map_err(|e| bad_request(e.body_text()))?;

    if new.public_url.trim().is_empty() {
        return Err(bad_request("public_url must not be empty"));
    }

    let outcome = state.store.create(&new).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

// ============ GET /api/gazettes/{id} ============

async fn handle_get_gazette(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GazetteRecord>, AppError> {
    let id: i64 = id
        .parse()
        .map_err(|_| bad_request(format!("id must be an integer, got '{}'", id)))?;

    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no gazette with id {}", id)))
}
