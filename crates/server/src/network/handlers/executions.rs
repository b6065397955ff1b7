//! Execution inspection and lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use conductor_core::WorkflowExecution;

use crate::error::OrchestratorError;

use super::AppState;

/// Filter for `GET /executions`.
#[derive(Debug, Default, Deserialize)]
pub struct ExecutionsQuery {
    /// Restrict to executions of one workflow.
    pub workflow_id: Option<String>,
}

/// `GET /executions?workflow_id=`
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> Json<Vec<WorkflowExecution>> {
    Json(state.engine.list_executions(query.workflow_id.as_deref()))
}

/// `GET /executions/{id}` -- the record carries per-step status.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExecution>, OrchestratorError> {
    Ok(Json(state.engine.get_execution(&id)?))
}

/// `POST /executions/{id}/cancel` -- 202, cancellation is cooperative.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<WorkflowExecution>), OrchestratorError> {
    let execution = state.engine.cancel(&id)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// `POST /executions/{id}/retry` -- 202, re-runs failed/skipped steps.
pub async fn retry_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<WorkflowExecution>), OrchestratorError> {
    let execution = state.engine.retry(&id)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}
