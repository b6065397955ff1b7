//! Workflow definition and execution-start endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use conductor_core::{Workflow, WorkflowExecution};

use crate::engine::CreateWorkflowRequest;
use crate::error::OrchestratorError;

use super::AppState;

/// Execution trigger body. The input is addressable from step
/// parameters as `{{input.path}}`.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    /// Trigger input, defaults to JSON null.
    #[serde(default)]
    pub input: serde_json::Value,
}

/// `POST /workflows`
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), OrchestratorError> {
    let workflow = state.engine.create_workflow(req)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// `GET /workflows`
pub async fn list_workflows(State(state): State<AppState>) -> Json<Vec<Workflow>> {
    Json(
        state
            .engine
            .list_workflows()
            .iter()
            .map(|w| w.as_ref().clone())
            .collect(),
    )
}

/// `GET /workflows/{id}`
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, OrchestratorError> {
    let workflow = state.engine.get_workflow(&id)?;
    Ok(Json(workflow.as_ref().clone()))
}

/// `POST /workflows/{id}/execute` -- 202, execution proceeds async.
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<WorkflowExecution>), OrchestratorError> {
    let execution = state.engine.execute(&id, req.input)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}
