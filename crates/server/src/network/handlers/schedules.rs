//! Scheduled task endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use conductor_core::{ScheduledTask, WorkflowExecution};

use crate::error::OrchestratorError;
use crate::scheduler::ScheduleRequest;

use super::AppState;

/// `POST /schedules`
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduledTask>), OrchestratorError> {
    let task = state.scheduler.schedule(req)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `GET /schedules`
pub async fn list_schedules(State(state): State<AppState>) -> Json<Vec<ScheduledTask>> {
    Json(state.scheduler.list())
}

/// `DELETE /schedules/{id}`
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, OrchestratorError> {
    state.scheduler.cancel(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /schedules/{id}/trigger-now` -- 202, fires without touching
/// the cron schedule.
pub async fn trigger_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<WorkflowExecution>), OrchestratorError> {
    let execution = state.scheduler.trigger_now(&id)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// `POST /schedules/{id}/pause`
pub async fn pause_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledTask>, OrchestratorError> {
    Ok(Json(state.scheduler.pause(&id)?))
}

/// `POST /schedules/{id}/resume`
pub async fn resume_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledTask>, OrchestratorError> {
    Ok(Json(state.scheduler.resume(&id)?))
}
