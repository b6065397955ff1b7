//! DAG workflow engine.
//!
//! Workflows are validated at creation and immutable afterwards.
//! Executing a workflow spawns one driver task that owns the execution
//! record for its whole lifetime; the API reads snapshots through the
//! shared executions map. Execution is asynchronous by design: the
//! caller gets the Running record back immediately and polls.

mod driver;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use serde::Deserialize;
use tokio::sync::{watch, Semaphore};
use tracing::info;
use uuid::Uuid;

use conductor_core::{
    validate_steps, ExecutionStatus, StepExecution, StepStatus, Workflow, WorkflowExecution,
    WorkflowStep,
};

use crate::balancer::{LoadBalancer, Strategy};
use crate::breaker::BreakerRegistry;
use crate::config::EngineConfig;
use crate::error::OrchestratorError;
use crate::invoke::ServiceInvoker;

/// Workflow creation request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    /// Human-readable workflow name.
    pub name: String,
    /// Step definitions, validated to form a DAG.
    pub steps: Vec<WorkflowStep>,
    /// Creator identity, if known.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// The orchestrator's workflow engine.
pub struct WorkflowEngine {
    workflows: DashMap<String, Arc<Workflow>>,
    executions: DashMap<String, WorkflowExecution>,
    /// Cooperative cancellation flag per live execution.
    cancel_flags: DashMap<String, watch::Sender<bool>>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<BreakerRegistry>,
    invoker: Arc<dyn ServiceInvoker>,
    strategy: Strategy,
    /// Fan-out bound across all executions.
    global_permits: Arc<Semaphore>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Creates an engine over the dispatch collaborators.
    #[must_use]
    pub fn new(
        balancer: Arc<LoadBalancer>,
        breakers: Arc<BreakerRegistry>,
        invoker: Arc<dyn ServiceInvoker>,
        strategy: Strategy,
        config: EngineConfig,
    ) -> Self {
        let global_permits = Arc::new(Semaphore::new(config.global_fanout));
        Self {
            workflows: DashMap::new(),
            executions: DashMap::new(),
            cancel_flags: DashMap::new(),
            balancer,
            breakers,
            invoker,
            strategy,
            global_permits,
            config,
        }
    }

    // ---- workflows ----

    /// Validates and stores a workflow definition.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name or step list, or the
    /// specific [`conductor_core::DagError`] for a bad dependency graph.
    pub fn create_workflow(
        &self,
        req: CreateWorkflowRequest,
    ) -> Result<Workflow, OrchestratorError> {
        if req.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "workflow name must be non-empty".to_string(),
            ));
        }
        if req.steps.is_empty() {
            return Err(OrchestratorError::Validation(
                "workflow must contain at least one step".to_string(),
            ));
        }
        for step in &req.steps {
            if step.id.trim().is_empty() {
                return Err(OrchestratorError::Validation(
                    "step ids must be non-empty".to_string(),
                ));
            }
            // "input" is the template namespace for the trigger input.
            if step.id == "input" {
                return Err(OrchestratorError::Validation(
                    "step id \"input\" is reserved".to_string(),
                ));
            }
        }
        validate_steps(&req.steps)?;

        let workflow = Workflow {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            steps: req.steps,
            created_at: Utc::now(),
            created_by: req.created_by,
        };
        self.workflows
            .insert(workflow.id.clone(), Arc::new(workflow.clone()));
        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "workflow created"
        );
        Ok(workflow)
    }

    /// Fetches a workflow by id.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` for an unknown id.
    pub fn get_workflow(&self, id: &str) -> Result<Arc<Workflow>, OrchestratorError> {
        self.workflows
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::WorkflowNotFound { id: id.to_string() })
    }

    /// Every stored workflow.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<Arc<Workflow>> {
        self.workflows.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of stored workflows.
    #[must_use]
    pub fn workflow_count(&self) -> usize {
        self.workflows.len()
    }

    // ---- executions ----

    /// Starts an execution of `workflow_id` and returns the Running
    /// record immediately; a spawned driver task does the work.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` for an unknown workflow.
    pub fn execute(
        self: &Arc<Self>,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let workflow = self.get_workflow(workflow_id)?;

        let id = Uuid::new_v4().to_string();
        let mut execution = WorkflowExecution::pending(id.clone(), &workflow, input);
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.executions.insert(id.clone(), execution.clone());

        let cancel = self.arm_cancel(&id);
        counter!("conductor_executions_total").increment(1);
        info!(execution_id = %id, workflow_id, "execution started");
        tokio::spawn(driver::drive(self.clone(), workflow, id, cancel));
        Ok(execution)
    }

    /// Requests cooperative cancellation of a live execution. Remaining
    /// steps end Skipped; in-flight invocations run to completion but
    /// their results are discarded.
    ///
    /// # Errors
    ///
    /// `ExecutionNotFound` for an unknown id, `InvalidExecutionState`
    /// if the execution is already terminal.
    pub fn cancel(&self, execution_id: &str) -> Result<WorkflowExecution, OrchestratorError> {
        let snapshot = self.get_execution(execution_id)?;
        if snapshot.status.is_terminal() {
            return Err(OrchestratorError::InvalidExecutionState {
                id: execution_id.to_string(),
                state: status_label(snapshot.status).to_string(),
            });
        }
        if let Some(tx) = self.cancel_flags.get(execution_id) {
            let _ = tx.send(true);
        }
        info!(execution_id, "execution cancellation requested");
        Ok(snapshot)
    }

    /// Re-runs the Failed and Skipped steps of a terminal execution in
    /// place, seeding template data from prior successes.
    ///
    /// # Errors
    ///
    /// `ExecutionNotFound` for an unknown id, `InvalidExecutionState`
    /// unless the execution is Failed or Cancelled.
    pub fn retry(
        self: &Arc<Self>,
        execution_id: &str,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let workflow;
        let snapshot;
        {
            let mut record = self.executions.get_mut(execution_id).ok_or_else(|| {
                OrchestratorError::ExecutionNotFound {
                    id: execution_id.to_string(),
                }
            })?;
            if !matches!(
                record.status,
                ExecutionStatus::Failed | ExecutionStatus::Cancelled
            ) {
                return Err(OrchestratorError::InvalidExecutionState {
                    id: execution_id.to_string(),
                    state: status_label(record.status).to_string(),
                });
            }
            workflow = self.get_workflow(&record.workflow_id)?;

            for step in record.step_executions.values_mut() {
                if step.status != StepStatus::Succeeded {
                    let step_id = step.step_id.clone();
                    *step = StepExecution::pending(&step_id);
                }
            }
            record.status = ExecutionStatus::Running;
            record.started_at = Some(Utc::now());
            record.ended_at = None;
            record.error = None;
            snapshot = record.clone();
        }

        let cancel = self.arm_cancel(execution_id);
        counter!("conductor_execution_retries_total").increment(1);
        info!(execution_id, "execution retry started");
        tokio::spawn(driver::drive(
            self.clone(),
            workflow,
            execution_id.to_string(),
            cancel,
        ));
        Ok(snapshot)
    }

    /// Snapshot of one execution.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionNotFound` for an unknown id.
    pub fn get_execution(&self, id: &str) -> Result<WorkflowExecution, OrchestratorError> {
        self.executions
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::ExecutionNotFound { id: id.to_string() })
    }

    /// Snapshots of executions, optionally filtered by workflow.
    #[must_use]
    pub fn list_executions(&self, workflow_id: Option<&str>) -> Vec<WorkflowExecution> {
        self.executions
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| workflow_id.is_none_or(|id| e.workflow_id == id))
            .collect()
    }

    /// Number of executions held by the engine.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    fn arm_cancel(&self, execution_id: &str) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.cancel_flags.insert(execution_id.to_string(), tx);
        rx
    }
}

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}
