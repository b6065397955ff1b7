//! Instance registry endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use conductor_core::{HealthRecord, ServiceInstance};

use crate::error::OrchestratorError;
use crate::registry::{FindQuery, RegisterRequest};

use super::AppState;

/// Instance record plus its latest probe, for API responses.
#[derive(Debug, Serialize)]
pub struct InstanceView {
    /// The registered instance.
    #[serde(flatten)]
    pub instance: ServiceInstance,
    /// Latest probe record, absent before the first probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
}

/// `POST /registry/instances`
pub async fn register_instance(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ServiceInstance>), OrchestratorError> {
    let instance = state.registry.register(req)?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// `GET /registry/instances?name=&kind=&status=`
pub async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<FindQuery>,
) -> Json<Vec<ServiceInstance>> {
    Json(state.registry.find(&query))
}

/// `GET /registry/instances/{id}`
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceView>, OrchestratorError> {
    let instance = state
        .registry
        .get(&id)
        .ok_or(OrchestratorError::InstanceNotFound { id: id.clone() })?;
    let health = state.registry.health_record(&id);
    Ok(Json(InstanceView { instance, health }))
}

/// `DELETE /registry/instances/{id}`
pub async fn deregister_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, OrchestratorError> {
    state.registry.deregister(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
