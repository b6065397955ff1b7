//! Per-execution driver task.
//!
//! Exactly one driver owns an execution record from start to terminal
//! state. Step tasks never touch the record: they report through an
//! event channel and the driver is the single writer, so a cancelled
//! execution can be finalized immediately and late results discarded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use conductor_core::{
    ready_steps, resolve_parameters, StepStatus, Workflow, WorkflowStep,
};

use crate::error::OrchestratorError;

use super::WorkflowEngine;

enum StepEvent {
    /// A dispatch attempt is starting.
    Attempt { step_id: String, attempt: u32 },
    /// The step reached its final outcome.
    Finished {
        step_id: String,
        outcome: Result<Value, OrchestratorError>,
    },
}

pub(super) async fn drive(
    engine: Arc<WorkflowEngine>,
    workflow: Arc<Workflow>,
    execution_id: String,
    mut cancel: watch::Receiver<bool>,
) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let per_exec = Arc::new(Semaphore::new(engine.config.per_execution_fanout));

    // Seed from the record: on retry, prior successes feed templates
    // and are never re-dispatched.
    let mut results: HashMap<String, Value> = HashMap::new();
    let mut succeeded: HashSet<String> = HashSet::new();
    let mut started: HashSet<String> = HashSet::new();
    {
        let Some(record) = engine.executions.get(&execution_id) else {
            return;
        };
        results.insert("input".to_string(), record.input.clone());
        for (id, step) in &record.step_executions {
            if step.status == StepStatus::Succeeded {
                succeeded.insert(id.clone());
                started.insert(id.clone());
                results.insert(id.clone(), step.result.clone().unwrap_or(Value::Null));
            }
        }
    }

    let mut in_flight: usize = 0;
    let mut halted = false;
    let mut cancel_alive = true;

    loop {
        if !halted {
            let ready: Vec<WorkflowStep> = ready_steps(&workflow.steps, &succeeded, &started)
                .into_iter()
                .cloned()
                .collect();
            for step in ready {
                started.insert(step.id.clone());
                match resolve_parameters(&step.parameters, &results) {
                    Ok(params) => {
                        in_flight += 1;
                        spawn_step(
                            engine.clone(),
                            step,
                            params,
                            events_tx.clone(),
                            cancel.clone(),
                            per_exec.clone(),
                        );
                    }
                    Err(error) => {
                        // Definition bug: fatal for the execution, no
                        // dispatch, no retries.
                        let error = OrchestratorError::from(error);
                        warn!(execution_id, step = %step.id, %error, "template resolution failed");
                        mark_failed(&engine, &execution_id, &step.id, &error);
                        halted = true;
                        break;
                    }
                }
            }
        }

        if in_flight == 0 {
            break;
        }

        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    StepEvent::Attempt { step_id, attempt } => {
                        mark_attempt(&engine, &execution_id, &step_id, attempt);
                    }
                    StepEvent::Finished { step_id, outcome } => {
                        in_flight -= 1;
                        match outcome {
                            Ok(value) => {
                                counter!("conductor_steps_succeeded_total").increment(1);
                                mark_succeeded(&engine, &execution_id, &step_id, &value);
                                results.insert(step_id.clone(), value);
                                succeeded.insert(step_id);
                            }
                            Err(error) => {
                                counter!("conductor_steps_failed_total").increment(1);
                                warn!(execution_id, step = %step_id, %error, "step failed");
                                mark_failed(&engine, &execution_id, &step_id, &error);
                                // Fail fast: drain in-flight steps but
                                // dispatch nothing new.
                                halted = true;
                            }
                        }
                    }
                }
            }
            changed = cancel.changed(), if cancel_alive => {
                match changed {
                    Ok(()) if *cancel.borrow() => {
                        finalize(&engine, &execution_id, true);
                        return;
                    }
                    Ok(()) => {}
                    Err(_) => cancel_alive = false,
                }
            }
        }
    }

    finalize(&engine, &execution_id, false);
}

fn spawn_step(
    engine: Arc<WorkflowEngine>,
    step: WorkflowStep,
    params: Value,
    events: mpsc::UnboundedSender<StepEvent>,
    cancel: watch::Receiver<bool>,
    per_exec: Arc<Semaphore>,
) {
    tokio::spawn(async move {
        // Per-execution fan-out bound nested under the global bound.
        let local = per_exec.acquire_owned().await;
        let global = engine.global_permits.clone().acquire_owned().await;
        if local.is_err() || global.is_err() {
            let _ = events.send(StepEvent::Finished {
                step_id: step.id.clone(),
                outcome: Err(OrchestratorError::Internal(anyhow::anyhow!(
                    "engine shutting down"
                ))),
            });
            return;
        }

        let outcome = run_step(&engine, &step, &params, &events, &cancel).await;
        let _ = events.send(StepEvent::Finished {
            step_id: step.id.clone(),
            outcome,
        });
    });
}

/// Runs one step to its final outcome, retrying transient failures
/// with linear backoff capped by the engine config.
async fn run_step(
    engine: &WorkflowEngine,
    step: &WorkflowStep,
    params: &Value,
    events: &mpsc::UnboundedSender<StepEvent>,
    cancel: &watch::Receiver<bool>,
) -> Result<Value, OrchestratorError> {
    let total_attempts = step.max_retries + 1;
    for attempt in 1..=total_attempts {
        if *cancel.borrow() {
            return Err(OrchestratorError::StepExecution {
                step: step.id.clone(),
                message: "execution cancelled".to_string(),
            });
        }

        let _ = events.send(StepEvent::Attempt {
            step_id: step.id.clone(),
            attempt,
        });
        counter!("conductor_step_attempts_total").increment(1);

        let error = match attempt_once(engine, step, params).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable_step_failure() || attempt == total_attempts {
            return Err(error);
        }

        debug!(step = %step.id, attempt, %error, "step attempt failed, backing off");
        let backoff = (engine.config.backoff_base * attempt).min(engine.config.backoff_cap);
        let mut cancel = cancel.clone();
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = cancel.changed() => {}
        }
    }

    // total_attempts >= 1, so the loop always returns.
    Err(OrchestratorError::StepExecution {
        step: step.id.clone(),
        message: "retries exhausted".to_string(),
    })
}

/// One dispatch attempt: pick an instance, pass the breaker, invoke
/// under the step deadline, record the outcome on the breaker.
async fn attempt_once(
    engine: &WorkflowEngine,
    step: &WorkflowStep,
    params: &Value,
) -> Result<Value, OrchestratorError> {
    let instance = engine
        .balancer
        .pick(&step.service, &step.operation, engine.strategy, Instant::now())?;

    if engine
        .breakers
        .try_acquire(&instance.instance_id, &step.operation, Instant::now())
        .is_err()
    {
        return Err(OrchestratorError::CircuitOpen {
            target: instance.instance_id,
            operation: step.operation.clone(),
        });
    }

    let deadline = Duration::from_millis(step.timeout_ms);
    match tokio::time::timeout(
        deadline,
        engine.invoker.invoke(&instance, &step.operation, params),
    )
    .await
    {
        Ok(Ok(value)) => {
            engine
                .breakers
                .on_success(&instance.instance_id, &step.operation, Instant::now());
            Ok(value)
        }
        Ok(Err(error)) => {
            engine
                .breakers
                .on_failure(&instance.instance_id, &step.operation, Instant::now());
            Err(OrchestratorError::StepExecution {
                step: step.id.clone(),
                message: error.to_string(),
            })
        }
        Err(_) => {
            engine
                .breakers
                .on_failure(&instance.instance_id, &step.operation, Instant::now());
            Err(OrchestratorError::StepTimeout {
                step: step.id.clone(),
                timeout_ms: step.timeout_ms,
            })
        }
    }
}

// ---- record updates (driver is the single writer) ----

fn mark_attempt(engine: &WorkflowEngine, execution_id: &str, step_id: &str, attempt: u32) {
    if let Some(mut record) = engine.executions.get_mut(execution_id) {
        if let Some(step) = record.step_executions.get_mut(step_id) {
            step.status = StepStatus::Running;
            step.attempt = attempt;
            if step.started_at.is_none() {
                step.started_at = Some(Utc::now());
            }
        }
    }
}

fn mark_succeeded(engine: &WorkflowEngine, execution_id: &str, step_id: &str, value: &Value) {
    if let Some(mut record) = engine.executions.get_mut(execution_id) {
        if let Some(step) = record.step_executions.get_mut(step_id) {
            step.status = StepStatus::Succeeded;
            step.result = Some(value.clone());
            step.ended_at = Some(Utc::now());
        }
    }
}

fn mark_failed(
    engine: &WorkflowEngine,
    execution_id: &str,
    step_id: &str,
    error: &OrchestratorError,
) {
    if let Some(mut record) = engine.executions.get_mut(execution_id) {
        if let Some(step) = record.step_executions.get_mut(step_id) {
            step.status = StepStatus::Failed;
            step.error = Some(error.to_string());
            step.ended_at = Some(Utc::now());
        }
    }
}

/// Marks every non-terminal step Skipped and settles the execution
/// status: Cancelled, Failed (any failed step), or Completed.
fn finalize(engine: &WorkflowEngine, execution_id: &str, cancelled: bool) {
    use conductor_core::ExecutionStatus;

    let Some(mut record) = engine.executions.get_mut(execution_id) else {
        return;
    };
    let now = Utc::now();

    let mut failure = None;
    for step in record.step_executions.values_mut() {
        match step.status {
            StepStatus::Failed => {
                if failure.is_none() {
                    failure = Some(format!(
                        "step {} failed: {}",
                        step.step_id,
                        step.error.clone().unwrap_or_default()
                    ));
                }
            }
            status if !status.is_terminal() => {
                step.status = StepStatus::Skipped;
                step.ended_at = Some(now);
            }
            _ => {}
        }
    }

    record.status = if cancelled {
        ExecutionStatus::Cancelled
    } else if failure.is_some() {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Completed
    };
    record.error = if cancelled { None } else { failure };
    record.ended_at = Some(now);

    info!(
        execution_id,
        status = super::status_label(record.status),
        "execution finished"
    );
}
