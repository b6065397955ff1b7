//! Orchestrator error taxonomy and HTTP mapping.
//!
//! Validation-class errors are rejected synchronously at the API
//! boundary; dispatch-class errors surface only through execution
//! records (execution is asynchronous by design). Every variant maps to
//! a stable `kind` string carried in the JSON error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use conductor_core::{CronParseError, DagError, TemplateError};

/// All error conditions produced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed input rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Workflow definition rejected by DAG validation.
    #[error(transparent)]
    Dag(#[from] DagError),

    /// Template reference could not be resolved. Fatal, never retried.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Cron expression rejected at schedule creation.
    #[error(transparent)]
    Cron(#[from] CronParseError),

    /// No healthy instance registered for the logical service.
    #[error("no healthy instance for service {service}")]
    NoHealthyInstance {
        /// The logical service name.
        service: String,
    },

    /// Every healthy candidate sits behind an open circuit.
    #[error("all circuits open for service {service} operation {operation}")]
    AllCircuitsOpen {
        /// The logical service name.
        service: String,
        /// The requested operation.
        operation: String,
    },

    /// Fast-fail without a downstream call: the breaker is open.
    #[error("circuit open for {target} operation {operation}")]
    CircuitOpen {
        /// The breaker target (instance id).
        target: String,
        /// The requested operation.
        operation: String,
    },

    /// A step attempt exceeded its timeout. Retried up to `max_retries`.
    #[error("step {step} timed out after {timeout_ms}ms")]
    StepTimeout {
        /// The step id.
        step: String,
        /// The configured per-attempt timeout.
        timeout_ms: u64,
    },

    /// A step attempt failed downstream. Retried up to `max_retries`.
    #[error("step {step} failed: {message}")]
    StepExecution {
        /// The step id.
        step: String,
        /// Downstream error detail.
        message: String,
    },

    /// Unknown workflow id.
    #[error("workflow not found: {id}")]
    WorkflowNotFound {
        /// The missing id.
        id: String,
    },

    /// Unknown execution id.
    #[error("execution not found: {id}")]
    ExecutionNotFound {
        /// The missing id.
        id: String,
    },

    /// Unknown instance id (deregistration only; other registry
    /// mutators are idempotent).
    #[error("instance not found: {id}")]
    InstanceNotFound {
        /// The missing id.
        id: String,
    },

    /// Unknown scheduled task id.
    #[error("scheduled task not found: {id}")]
    TaskNotFound {
        /// The missing id.
        id: String,
    },

    /// Operation not valid for the execution's current state, e.g.
    /// retrying an execution that is still running.
    #[error("execution {id} is {state}; operation requires a different state")]
    InvalidExecutionState {
        /// The execution id.
        id: String,
        /// Its current status, lowercase.
        state: String,
    },

    /// Wiring or storage failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Stable machine-readable error kind for the API envelope.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Dag(DagError::CyclicDependency { .. }) => "CyclicDependencyError",
            Self::Dag(DagError::UnknownStepReference { .. }) => "UnknownStepReferenceError",
            Self::Dag(DagError::DuplicateStepId { .. }) => "DuplicateStepIdError",
            Self::Template(_) => "TemplateResolutionError",
            Self::Cron(_) => "InvalidCronExpressionError",
            Self::NoHealthyInstance { .. } => "NoHealthyInstanceError",
            Self::AllCircuitsOpen { .. } => "AllCircuitsOpenError",
            Self::CircuitOpen { .. } => "CircuitOpenError",
            Self::StepTimeout { .. } => "StepTimeoutError",
            Self::StepExecution { .. } => "StepExecutionError",
            Self::WorkflowNotFound { .. } => "WorkflowNotFoundError",
            Self::ExecutionNotFound { .. } => "ExecutionNotFoundError",
            Self::InstanceNotFound { .. } => "InstanceNotFoundError",
            Self::TaskNotFound { .. } => "TaskNotFoundError",
            Self::InvalidExecutionState { .. } => "InvalidExecutionStateError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// HTTP status for the API boundary.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Dag(_) | Self::Template(_) | Self::Cron(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::WorkflowNotFound { .. }
            | Self::ExecutionNotFound { .. }
            | Self::InstanceNotFound { .. }
            | Self::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidExecutionState { .. } => StatusCode::CONFLICT,
            Self::NoHealthyInstance { .. }
            | Self::AllCircuitsOpen { .. }
            | Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::StepTimeout { .. } | Self::StepExecution { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the engine may retry a step attempt that failed with
    /// this error. Template resolution is a definition bug and is
    /// always fatal.
    #[must_use]
    pub fn is_retryable_step_failure(&self) -> bool {
        matches!(
            self,
            Self::StepTimeout { .. }
                | Self::StepExecution { .. }
                | Self::CircuitOpen { .. }
                | Self::NoHealthyInstance { .. }
                | Self::AllCircuitsOpen { .. }
        )
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_errors_map_to_wire_kinds() {
        let cyclic: OrchestratorError = DagError::CyclicDependency {
            step: "a".to_string(),
        }
        .into();
        assert_eq!(cyclic.kind(), "CyclicDependencyError");
        assert_eq!(cyclic.status_code(), StatusCode::BAD_REQUEST);

        let dangling: OrchestratorError = DagError::UnknownStepReference {
            step: "a".to_string(),
            reference: "ghost".to_string(),
        }
        .into();
        assert_eq!(dangling.kind(), "UnknownStepReferenceError");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = OrchestratorError::WorkflowNotFound {
            id: "wf-1".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "WorkflowNotFoundError");
    }

    #[test]
    fn invalid_state_maps_to_409() {
        let err = OrchestratorError::InvalidExecutionState {
            id: "ex-1".to_string(),
            state: "running".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn template_failure_is_fatal() {
        let err: OrchestratorError = TemplateError::PathNotFound {
            token: "a.missing".to_string(),
        }
        .into();
        assert!(!err.is_retryable_step_failure());
        assert_eq!(err.kind(), "TemplateResolutionError");
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(OrchestratorError::StepTimeout {
            step: "a".to_string(),
            timeout_ms: 30_000,
        }
        .is_retryable_step_failure());
        assert!(OrchestratorError::CircuitOpen {
            target: "svc-1".to_string(),
            operation: "op".to_string(),
        }
        .is_retryable_step_failure());
        assert!(OrchestratorError::NoHealthyInstance {
            service: "svc".to_string(),
        }
        .is_retryable_step_failure());
    }
}
