//! Fanout HTTP API
//!
//! Two routers, served on separate listeners:
//! - relay: a single catch-all route broadcasting every request
//! - management: Kubernetes probes, Prometheus metrics, OpenAPI document

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fo_common::BroadcastRequest;
use fo_registry::Registry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use utoipa::OpenApi;

use crate::dispatcher::Dispatcher;
use crate::error::FanoutError;
use crate::relay_metrics;

pub mod model;

use model::{ProbeResponse, TargetQuery};

/// State shared by every relay request
#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<dyn Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub default_namespace: String,
    pub default_service: String,
    /// Largest inbound body read before broadcasting
    pub max_body_bytes: usize,
}

impl RelayState {
    pub fn new(registry: Arc<dyn Registry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            default_namespace: "default".to_string(),
            default_service: String::new(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_default_target(
        mut self,
        namespace: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        self.default_namespace = namespace.into();
        self.default_service = service.into();
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Effective (namespace, service) for a request.
    fn target(&self, query: TargetQuery) -> (String, String) {
        let namespace = query
            .namespace
            .unwrap_or_else(|| self.default_namespace.clone());
        let service = query
            .endpoint
            .unwrap_or_else(|| self.default_service.clone());
        (namespace, service)
    }
}

/// Router that broadcasts every request, whatever its method or path.
pub fn create_relay_router(state: RelayState) -> Router {
    Router::new().fallback(broadcast_handler).with_state(state)
}

async fn broadcast_handler(State(state): State<RelayState>, request: Request) -> Response {
    // A query that does not decode is rejected, never replaced by the defaults
    let query = match Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
        Ok(Query(pairs)) => TargetQuery::from_pairs(pairs),
        Err(rejection) => {
            let err = FanoutError::InvalidQuery(rejection.body_text());
            warn!(uri = %request.uri(), error = %err, "Rejected relay query");
            relay_metrics::record_broadcast(err.outcome());
            return err.into_response();
        }
    };
    let (namespace, service) = state.target(query);

    let span = info_span!(
        "broadcast",
        method = %request.method(),
        path = %request.uri().path(),
        namespace = %namespace,
        service = %service,
    );

    match broadcast(&state, request, &namespace, &service)
        .instrument(span)
        .await
    {
        Ok(response) => {
            relay_metrics::record_broadcast("selected");
            response
        }
        Err(e) => {
            relay_metrics::record_broadcast(e.outcome());
            e.into_response()
        }
    }
}

async fn broadcast(
    state: &RelayState,
    request: Request,
    namespace: &str,
    service: &str,
) -> Result<Response, FanoutError> {
    let endpoints = state
        .registry
        .resolve(namespace, service)
        .await
        .map_err(|e| {
            warn!(error = %e, kind = e.label(), "Service resolution failed");
            FanoutError::from(e)
        })?;

    if endpoints.is_empty() {
        warn!("No instances available");
        return Err(FanoutError::NoInstances {
            namespace: namespace.to_string(),
            service: service.to_string(),
        });
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to read request body");
            FanoutError::BodyRead(e.to_string())
        })?;

    let mut broadcast_request = BroadcastRequest::new(parts.method, parts.uri.path(), body);
    if let Some(content_type) = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        broadcast_request = broadcast_request.with_content_type(content_type);
    }

    let outcome = state
        .dispatcher
        .dispatch(broadcast_request, endpoints)
        .await?;

    info!(
        selected = outcome.selected,
        url = %outcome.url,
        status = outcome.status,
        total = outcome.total,
        failed = outcome.failed,
        bytes = outcome.body.len(),
        "Broadcast complete"
    );

    let mut response = Response::new(Body::from(outcome.body));
    if let Some(content_type) = outcome
        .content_type
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

// ============================================================================
// Management Endpoints
// ============================================================================

/// OpenAPI documentation for the management listener
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fanout Relay Management API",
        version = "0.1.0",
        description = "Health probes and metrics for the fanout relay"
    ),
    paths(liveness_probe, readiness_probe, metrics_handler),
    components(schemas(ProbeResponse)),
    tags(
        (name = "health", description = "Kubernetes probes"),
        (name = "monitoring", description = "Prometheus metrics")
    )
)]
pub struct ManagementApiDoc;

#[derive(Clone)]
struct ManagementState {
    prometheus: Option<PrometheusHandle>,
}

/// Router for probes and metrics. Without a Prometheus handle `/metrics`
/// answers with an empty exposition.
pub fn create_management_router(prometheus: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
        .route("/api-doc/openapi.json", get(openapi_handler))
        .with_state(ManagementState { prometheus })
}

/// Kubernetes liveness probe - returns 200 if the process is running
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Relay is live", body = ProbeResponse)
    )
)]
async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "LIVE".to_string(),
    })
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Relay is ready", body = ProbeResponse)
    )
)]
async fn readiness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "READY".to_string(),
    })
}

/// Prometheus metrics endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    )
)]
async fn metrics_handler(State(state): State<ManagementState>) -> Response {
    let output = state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
        .into_response()
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ManagementApiDoc::openapi())
}
