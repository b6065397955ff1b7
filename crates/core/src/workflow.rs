//! Workflow, execution, and step data model.
//!
//! A [`Workflow`] is an immutable DAG of [`WorkflowStep`]s. Triggering a
//! workflow creates a [`WorkflowExecution`] owned by the engine for its
//! entire lifetime; per-step progress is recorded in [`StepExecution`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default per-step dispatch timeout in milliseconds.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One step of a workflow DAG.
///
/// `parameters` is opaque JSON except for `{{stepId.path}}` template
/// references, which the engine resolves from upstream step results
/// before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step identifier, unique within the workflow.
    pub id: String,
    /// Logical service name the step targets.
    pub service: String,
    /// Operation to invoke on the selected instance.
    pub operation: String,
    /// Call parameters; may embed `{{stepId.path}}` references.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Ids of steps that must succeed before this step dispatches.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-attempt dispatch timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// A named, immutable DAG of steps.
///
/// Updates never affect in-flight executions: the engine snapshots the
/// workflow when an execution is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Steps, validated to form a DAG before persistence.
    pub steps: Vec<WorkflowStep>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creator identity, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Workflow {
    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Lifecycle state of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    /// Created but not yet driven.
    Pending,
    /// The driver task is dispatching steps.
    Running,
    /// Every step succeeded or was skipped, none failed.
    Completed,
    /// At least one step failed after exhausting retries.
    Failed,
    /// Cancelled by an explicit API call.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle state of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    /// Waiting on dependencies or the fan-out limit.
    Pending,
    /// Dispatched and in flight.
    Running,
    /// Completed with a result.
    Succeeded,
    /// Exhausted retries or hit a fatal error.
    Failed,
    /// Never dispatched because an upstream step failed or the
    /// execution was cancelled.
    Skipped,
}

impl StepStatus {
    /// Whether the step has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Per-step progress record inside an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// The step this record tracks.
    pub step_id: String,
    /// Current lifecycle state.
    pub status: StepStatus,
    /// Attempt counter: 0 before the first dispatch, then 1-based.
    pub attempt: u32,
    /// Result JSON of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Final error message if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// First dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Time the step reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// Creates a fresh `Pending` record for `step_id`.
    #[must_use]
    pub fn pending(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            attempt: 0,
            result: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// One run of a workflow.
///
/// Owned by the engine's driver task for its entire lifetime;
/// append-only except for status and step-execution updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique execution id.
    pub id: String,
    /// The workflow this execution runs.
    pub workflow_id: String,
    /// Current lifecycle state.
    pub status: ExecutionStatus,
    /// Trigger input, addressable from templates as `{{input.path}}`.
    pub input: serde_json::Value,
    /// Per-step progress, keyed by step id.
    /// `BTreeMap` for deterministic serialization order.
    pub step_executions: BTreeMap<String, StepExecution>,
    /// When the driver started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Terminal error summary, referencing the failed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Creates a `Pending` execution for `workflow` with all step
    /// executions `Pending`.
    #[must_use]
    pub fn pending(id: String, workflow: &Workflow, input: serde_json::Value) -> Self {
        let step_executions = workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepExecution::pending(&s.id)))
            .collect();
        Self {
            id,
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            input,
            step_executions,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}
