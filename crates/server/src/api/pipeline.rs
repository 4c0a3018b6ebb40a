//! # Pipeline API
//!
//! Run a trigger and inspect or roll back a case's version history. Pipeline
//! events are streamed live over SSE.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;

use concord_core::error::StoreError;
use concord_core::state::{
    CaseContext, Contradiction, PipelineStatus, RefinementStatus, StateVersion, VersionSummary,
    WorkerId,
};
use concord_core::swarm::{ExecutionReport, MetricsSnapshot, PipelineResult};
use concord_core::workers::FinalReport;

use super::SharedState;

pub fn pipeline_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/pipeline/run", post(run_pipeline))
        .route("/cases", get(list_cases))
        .route("/cases/:id/history", get(get_history))
        .route("/cases/:id/state", get(get_latest))
        .route("/cases/:id/versions/:version", get(get_version))
        .route("/cases/:id/rollback", post(rollback))
        .route("/events", get(events))
        .route("/metrics", get(metrics))
}

// === API Types ===

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub trigger: String,
    #[serde(default)]
    pub context: CaseContext,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub case_id: String,
    pub version: u64,
    pub trace_id: String,
    pub intent: String,
    pub intent_confidence: f64,
    pub status: PipelineStatus,
    pub refinement_status: RefinementStatus,
    pub iterations: u32,
    pub contradictions: Vec<Contradiction>,
    pub unresolved: Vec<String>,
    pub timed_out_workers: Vec<WorkerId>,
    pub report: Option<FinalReport>,
    pub report_markdown: Option<String>,
    pub synthesis_error: Option<String>,
    pub execution_report: String,
}

impl From<PipelineResult> for RunResponse {
    fn from(result: PipelineResult) -> Self {
        let execution_report = ExecutionReport::new(&result.trace).render();
        let state = result.final_state;
        Self {
            case_id: state.case_id,
            version: result.final_version,
            trace_id: result.trace.trace_id,
            intent: state.intent.as_str().to_string(),
            intent_confidence: state.intent_confidence,
            status: state.status,
            refinement_status: state.refinement_status,
            iterations: state.iteration_count,
            unresolved: result
                .unresolved_contradictions
                .iter()
                .map(|c| c.id.to_string())
                .collect(),
            contradictions: state.contradictions,
            timed_out_workers: result.timed_out_workers,
            report_markdown: result.report.as_ref().map(FinalReport::render),
            report: result.report,
            synthesis_error: result.synthesis_error,
            execution_report,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: u64,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub case_id: String,
    pub restored_from: u64,
    pub version: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub workers: Vec<WorkerId>,
}

/// Error body: `{ "error": "..." }`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Empty | StoreError::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::ImmutableVersion(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{:#}", err),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// === Handlers ===

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        workers: state.controller.registered_workers(),
    })
}

async fn run_pipeline(
    State(state): State<SharedState>,
    Json(req): Json<RunRequest>,
) -> ApiResult<RunResponse> {
    if req.trigger.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "trigger must not be empty".to_string(),
        });
    }
    let result = state.controller.run_pipeline(&req.trigger, req.context).await?;
    Ok(Json(RunResponse::from(result)))
}

async fn list_cases(State(state): State<SharedState>) -> Json<Vec<String>> {
    Json(state.controller.case_ids())
}

async fn get_history(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
) -> ApiResult<Vec<VersionSummary>> {
    if state.controller.state_store(&case_id).is_none() {
        return Err(ApiError::not_found(format!("unknown case `{}`", case_id)));
    }
    Ok(Json(state.controller.get_state_history(&case_id)?))
}

async fn get_latest(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
) -> ApiResult<StateVersion> {
    let store = state
        .controller
        .state_store(&case_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown case `{}`", case_id)))?;
    Ok(Json(store.get_version(None)?))
}

async fn get_version(
    State(state): State<SharedState>,
    Path((case_id, version)): Path<(String, u64)>,
) -> ApiResult<StateVersion> {
    let store = state
        .controller
        .state_store(&case_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown case `{}`", case_id)))?;
    Ok(Json(store.get_version(Some(version))?))
}

async fn rollback(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<RollbackResponse> {
    let store = state
        .controller
        .state_store(&case_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown case `{}`", case_id)))?;
    let version = store.rollback(req.version)?;
    tracing::info!(case_id = %case_id, restored_from = req.version, version, "Case rolled back");

    Ok(Json(RollbackResponse {
        case_id,
        restored_from: req.version,
        version,
    }))
}

async fn metrics(State(state): State<SharedState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// SSE feed of every pipeline event, with a heartbeat every 15 seconds
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                let kind = serde_json::to_value(event.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "event".to_string());
                Some((Ok(Event::default().event(kind).data(json)), rx))
            }
            // Slow consumer: skip what was dropped
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped))) => Some((
                Ok(Event::default().comment(format!("lagged {}", skipped))),
                rx,
            )),
            Ok(Err(_)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
