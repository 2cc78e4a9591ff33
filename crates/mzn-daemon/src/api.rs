// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control-plane routes.
//!
//! Every route is wired through the governed pipeline (via [`crate::ops`]
//! for jobs, or a route-local handler for reads and memory writes); the
//! route table here mirrors the runtime's `RouteRegistry` bindings
//! one-to-one, which is what the no-bypass conformance test checks
//! structurally.

use crate::memory::{MemoryKind, MemoryWrite};
use crate::ops;
use crate::runtime::Runtime;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mzn_beamstore::BeamOp;
use mzn_error::{MathisonError, ReasonCode};
use mzn_governor::{DeniedResponse, GovernedHandler, HandlerContext};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Actor identity recorded for HTTP-originated requests.
const HTTP_ACTOR: &str = "http";

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// Structured API error with the stable wire shape
/// `{error, reason_code, message, violations?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn from_error(error: &MathisonError) -> Self {
        let mut body = json!({
            "error": error.reason_code.as_str(),
            "reason_code": error.reason_code,
            "message": error.message,
        });
        if !error.violations.is_empty() {
            body["violations"] = json!(error.violations);
        }
        Self {
            status: StatusCode::from_u16(error.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        }
    }

    fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::from_error(&MathisonError::new(
            ReasonCode::MalformedRequest,
            format!("request body malformed: {detail}"),
        ))
    }
}

impl From<DeniedResponse> for ApiError {
    fn from(denied: DeniedResponse) -> Self {
        Self::from_error(&denied.error)
    }
}

impl From<MathisonError> for ApiError {
    fn from(error: MathisonError) -> Self {
        Self::from_error(&error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route-local governed handlers (reads and memory writes)
// ---------------------------------------------------------------------------

struct HealthHandler {
    runtime: Arc<Runtime>,
}

#[async_trait]
impl GovernedHandler for HealthHandler {
    fn action_id(&self) -> &str {
        "governance.read"
    }

    async fn handle(&self, _body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let r = &self.runtime;
        Ok(json!({
            "status": "ok",
            "bootStatus": "ready",
            "governance": {
                "treaty": {
                    "version": r.treaty.version,
                    "authority": r.treaty.authority,
                },
                "genome": {
                    "name": r.genome.name,
                    "version": r.genome_version,
                    "id": r.genome_id,
                    "initialized": true,
                },
            },
        }))
    }
}

struct GenomeHandler {
    runtime: Arc<Runtime>,
}

#[async_trait]
impl GovernedHandler for GenomeHandler {
    fn action_id(&self) -> &str {
        "governance.read"
    }

    async fn handle(&self, _body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let r = &self.runtime;
        Ok(json!({
            "id": r.genome_id,
            "version": r.genome_version,
            "name": r.genome.name,
            "invariants": r.genome.invariants,
            "capabilities": r.genome.capabilities.iter().map(|c| &c.cap_id).collect::<Vec<_>>(),
            "parents": r.genome.parents,
        }))
    }
}

struct MemoryHandler {
    runtime: Arc<Runtime>,
    kind: MemoryKind,
    action: &'static str,
    field: &'static str,
}

#[async_trait]
impl GovernedHandler for MemoryHandler {
    fn action_id(&self) -> &str {
        self.action
    }

    async fn handle(&self, body: Value, _ctx: &HandlerContext) -> Result<Value, MathisonError> {
        let request: MemoryWrite = serde_json::from_value(body).map_err(|e| {
            MathisonError::new(ReasonCode::MalformedRequest, format!("memory write: {e}"))
        })?;
        let outcome = self.runtime.memory.write(self.kind, &request)?;
        let mut body = serde_json::Map::new();
        body.insert(
            self.field.to_string(),
            serde_json::to_value(&outcome.record).unwrap_or(Value::Null),
        );
        body.insert("created".to_string(), Value::Bool(outcome.created));
        Ok(Value::Object(body))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the daemon router over a booted runtime.
pub fn build_app(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/health", get(route_health))
        .route("/genome", get(route_genome))
        .route("/jobs/run", post(route_jobs_run))
        .route("/jobs/resume", post(route_jobs_resume))
        .route("/jobs/status", get(route_jobs_status))
        .route("/jobs/logs", get(route_jobs_logs))
        .route("/memory/nodes", post(route_memory_nodes))
        .route("/memory/edges", post(route_memory_edges))
        .route("/memory/hyperedges", post(route_memory_hyperedges))
        .route("/beams/put", post(route_beams_put))
        .route("/beams/retire", post(route_beams_retire))
        .route("/beams/pin", post(route_beams_pin))
        .route("/beams/unpin", post(route_beams_unpin))
        .route("/beams/tombstone", post(route_beams_tombstone))
        .route("/beams/purge", post(route_beams_purge))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(runtime)
}

async fn route_health(State(runtime): State<Arc<Runtime>>) -> Result<Json<Value>, ApiError> {
    let handler = HealthHandler {
        runtime: Arc::clone(&runtime),
    };
    let response = runtime
        .governor
        .govern(&handler, json!({}), None, HTTP_ACTOR)
        .await?;
    Ok(Json(response.body))
}

async fn route_genome(State(runtime): State<Arc<Runtime>>) -> Result<Json<Value>, ApiError> {
    let handler = GenomeHandler {
        runtime: Arc::clone(&runtime),
    };
    let response = runtime
        .governor
        .govern(&handler, json!({}), None, HTTP_ACTOR)
        .await?;
    Ok(Json(response.body))
}

async fn route_jobs_run(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).map_err(ApiError::malformed)?;
    let response = ops::run_job(&runtime, body, HTTP_ACTOR).await?;
    Ok(Json(with_receipt(response.body, &response.receipt)))
}

async fn route_jobs_resume(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).map_err(ApiError::malformed)?;
    let response = ops::resume_job(&runtime, body, HTTP_ACTOR).await?;
    Ok(Json(with_receipt(response.body, &response.receipt)))
}

async fn route_jobs_status(
    State(runtime): State<Arc<Runtime>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let job_id = params.get("job_id").cloned().unwrap_or_default();
    let response = ops::job_status(&runtime, &job_id, HTTP_ACTOR).await?;
    Ok(Json(response.body))
}

async fn route_jobs_logs(
    State(runtime): State<Arc<Runtime>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let job_id = params.get("job_id").cloned().unwrap_or_default();
    let response = ops::job_logs(&runtime, &job_id, HTTP_ACTOR).await?;
    Ok(Json(response.body))
}

async fn route_memory_nodes(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    memory_route(runtime, body, MemoryKind::Node, "memory.node.create", "node").await
}

async fn route_memory_edges(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    memory_route(runtime, body, MemoryKind::Edge, "memory.edge.create", "edge").await
}

async fn route_memory_hyperedges(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    memory_route(
        runtime,
        body,
        MemoryKind::Hyperedge,
        "memory.hyperedge.create",
        "hyperedge",
    )
    .await
}

async fn route_beams_put(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    beam_route(runtime, body, BeamOp::Put).await
}

async fn route_beams_retire(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    beam_route(runtime, body, BeamOp::Retire).await
}

async fn route_beams_pin(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    beam_route(runtime, body, BeamOp::Pin).await
}

async fn route_beams_unpin(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    beam_route(runtime, body, BeamOp::Unpin).await
}

async fn route_beams_tombstone(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    beam_route(runtime, body, BeamOp::Tombstone).await
}

async fn route_beams_purge(
    State(runtime): State<Arc<Runtime>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    beam_route(runtime, body, BeamOp::Purge).await
}

async fn beam_route(
    runtime: Arc<Runtime>,
    body: Bytes,
    op: BeamOp,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).map_err(ApiError::malformed)?;
    let response = crate::beams::apply(&runtime, op, body, HTTP_ACTOR).await?;
    Ok(Json(with_receipt(response.body, &response.receipt)))
}

async fn memory_route(
    runtime: Arc<Runtime>,
    body: Bytes,
    kind: MemoryKind,
    action: &'static str,
    field: &'static str,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).map_err(ApiError::malformed)?;
    let idempotency_key = body
        .get("idempotency_key")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let handler = MemoryHandler {
        runtime: Arc::clone(&runtime),
        kind,
        action,
        field,
    };
    let response = runtime
        .governor
        .govern(&handler, body, None, HTTP_ACTOR)
        .await?;

    // A replayed idempotency key returns the receipt of the original write.
    let created = response.body.get("created") == Some(&Value::Bool(true));
    let fresh_receipt = serde_json::to_value(&response.receipt).unwrap_or(Value::Null);
    let receipt = match (&idempotency_key, created) {
        (Some(key), true) => {
            runtime.memory.bind_receipt(key, fresh_receipt.clone());
            fresh_receipt
        }
        (Some(key), false) => runtime.memory.prior_receipt(key).unwrap_or(fresh_receipt),
        (None, _) => fresh_receipt,
    };
    let mut out = response.body;
    if let Value::Object(map) = &mut out {
        map.insert("receipt".to_string(), receipt);
    }
    Ok(Json(out))
}

fn with_receipt(mut body: Value, receipt: &mzn_receipt::Receipt) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert(
            "receipt".to_string(),
            serde_json::to_value(receipt).unwrap_or(Value::Null),
        );
    }
    body
}
