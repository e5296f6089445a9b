//! Admin HTTP API
//!
//! | Method | Path                                          | Body            |
//! |--------|-----------------------------------------------|-----------------|
//! | GET    | `/check`                                      |                 |
//! | GET    | `/api/1/services`                             |                 |
//! | GET    | `/api/1/services/:service_id`                 |                 |
//! | PUT    | `/api/1/services/:service_id/keys/:key_id`    | raw value       |
//! | PUT    | `/api/1/services/:service_id/schema`          | JSON schema map |
//! | PUT    | `/api/1/services/:service_id/clients/:id`     | JSON heartbeat  |
//! | PUT    | `/api/1/services/:service_id/info/:key`       | raw value       |
//! | GET    | `/metrics`                                    |                 |
//!
//! Errors are returned as `{"error": "..."}`.

use crate::clock::Clock;
use crate::config::{ConfigCache, PROMETHEUS_ENABLED};
use crate::export::exposition;
use crate::store::{
    ConfigSource, MemoryStore, Schema, ServiceList, ServiceView, TopologyError, TopologyProvider,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Body of `/metrics` while the Prometheus exporter is switched off
pub const METRICS_DISABLED_BODY: &str = "Prometheus exporter is disabled\n";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: MemoryStore,
    pub config: Arc<ConfigCache>,
    pub clock: Arc<dyn Clock>,
}

/// Error type for API handlers
#[derive(Debug)]
pub enum ApiError {
    Store(TopologyError),
    BadRequest(String),
}

impl From<TopologyError> for ApiError {
    fn from(e: TopologyError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(e @ TopologyError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct VersionResponse {
    pub version: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check", get(check))
        .route("/api/1/services", get(list_services))
        .route("/api/1/services/:service_id", get(get_service))
        .route("/api/1/services/:service_id/keys/:key_id", put(put_key))
        .route("/api/1/services/:service_id/schema", put(put_schema))
        .route(
            "/api/1/services/:service_id/clients/:instance_id",
            put(put_client),
        )
        .route("/api/1/services/:service_id/info/:key", put(put_info))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Admin API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn check() -> &'static str {
    "OK"
}

async fn list_services(State(state): State<AppState>) -> Result<Json<ServiceList>, ApiError> {
    let services = state.store.list_services().await?;
    Ok(Json(ServiceList { services }))
}

async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<ServiceView>, ApiError> {
    Ok(Json(state.store.service_view(&service_id)?))
}

async fn put_key(
    State(state): State<AppState>,
    Path((service_id, key_id)): Path<(String, String)>,
    body: String,
) -> Json<VersionResponse> {
    let version = state.store.set_config_item(&service_id, &key_id, &body);
    info!("Updated {}/{} = {:?} (version {})", service_id, key_id, body, version);
    Json(VersionResponse { version })
}

async fn put_schema(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let schema: Schema = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid schema: {}", e)))?;
    state.store.set_schema(&service_id, &schema).await?;
    info!("Schema of {} set ({} options)", service_id, schema.len());
    Ok(StatusCode::NO_CONTENT)
}

async fn put_client(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid heartbeat: {}", e)))?;
    if !payload.is_object() {
        return Err(ApiError::BadRequest("Heartbeat must be a JSON object".to_string()));
    }
    state
        .store
        .register_instance(&service_id, &instance_id, payload.to_string());
    Ok(StatusCode::NO_CONTENT)
}

async fn put_info(
    State(state): State<AppState>,
    Path((service_id, key)): Path<(String, String)>,
    body: String,
) -> StatusCode {
    state.store.set_service_info(&service_id, &key, &body);
    info!("Info of {} updated: {} = {:?}", service_id, key, body);
    StatusCode::NO_CONTENT
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let enabled = state.config.get_bool(PROMETHEUS_ENABLED).await.unwrap_or_else(|e| {
        warn!("Serving metrics anyway: {}", e);
        true
    });
    if !enabled {
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            METRICS_DISABLED_BODY,
        )
            .into_response());
    }

    let body = exposition::render(&state.store, state.clock.now()).await?;
    Ok(([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response())
}
