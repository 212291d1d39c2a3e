// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! HTTP provider API for faasrun.
//!
//! Exposes the deployment dispatcher over the OpenFaaS provider routes:
//!
//! ```text
//! POST|PUT /system/functions          deploy (fire-and-forget)
//! DELETE   /system/functions          cancel the in-flight run, or forget a finished one
//! GET      /system/functions          list deployments
//! GET      /system/function/{name}    deployment status
//! POST     /system/scale-function/{name}
//! GET      /system/info, /healthz
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use faasrun_core::{
    Accepted, DeploymentRequest, DeploymentStatus, DispatchError, Dispatcher, ServerConfig,
    ServiceName,
};

/// Provider state shared across handlers.
#[derive(Clone)]
struct ProviderState {
    dispatcher: Arc<Dispatcher>,
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::Invalid(_) => StatusCode::BAD_REQUEST,
            DispatchError::InFlight(_) => StatusCode::CONFLICT,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Self::new(status, e.to_string())
    }
}

/// Body of `DELETE /system/functions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFunctionRequest {
    function_name: String,
}

/// Build the provider router around `dispatcher`.
pub fn router(dispatcher: Arc<Dispatcher>, request_timeout: Duration) -> Router {
    let state = ProviderState { dispatcher };

    Router::new()
        .route(
            "/system/functions",
            get(list_functions)
                .post(deploy_function)
                .put(deploy_function)
                .delete(delete_function),
        )
        .route("/system/function/{name}", get(function_status))
        .route("/system/scale-function/{name}", post(scale_function))
        .route("/system/info", get(provider_info))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .with_state(state)
}

/// Serve the provider API until `shutdown` resolves.
pub async fn serve(
    dispatcher: Arc<Dispatcher>,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(dispatcher, request_timeout(config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.value()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        read_timeout_secs = config.read_timeout.as_secs(),
        write_timeout_secs = config.write_timeout.as_secs(),
        "Provider listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// The timeout layer bounds the whole exchange, reading and writing alike.
fn request_timeout(config: &ServerConfig) -> Duration {
    config.read_timeout.max(config.write_timeout)
}

async fn deploy_function(
    State(state): State<ProviderState>,
    body: Bytes,
) -> Result<Json<Accepted>, ApiError> {
    let request: DeploymentRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Malformed deployment request");
        ApiError::new(StatusCode::BAD_REQUEST, format!("malformed request body: {}", e))
    })?;

    let accepted = state.dispatcher.dispatch(request)?;
    Ok(Json(accepted))
}

async fn delete_function(
    State(state): State<ProviderState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: DeleteFunctionRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("malformed request body: {}", e))
    })?;
    let service = ServiceName::new(request.function_name)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let cancelled = state.dispatcher.cancel(&service)?;
    tracing::debug!(service = %service, cancelled, "Delete request handled");
    Ok(StatusCode::OK)
}

async fn list_functions(State(state): State<ProviderState>) -> Json<Vec<DeploymentStatus>> {
    Json(state.dispatcher.list())
}

async fn function_status(
    State(state): State<ProviderState>,
    Path(name): Path<String>,
) -> Result<Json<DeploymentStatus>, ApiError> {
    let service = ServiceName::new(name.as_str())
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, format!("No deployment for service {}", name)))?;
    Ok(Json(state.dispatcher.status(&service)?))
}

async fn scale_function(Path(name): Path<String>) -> StatusCode {
    tracing::debug!(service = %name, "Scale request ignored");
    StatusCode::OK
}

async fn provider_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "provider": {
            "provider": "faasrun",
            "orchestration": "containerd",
            "version": { "release": env!("CARGO_PKG_VERSION") },
        },
        "arch": std::env::consts::ARCH,
    }))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
