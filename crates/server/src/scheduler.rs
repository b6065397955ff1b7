//! Cron-driven workflow triggering.
//!
//! One ticker task evaluates due tasks at a 1s resolution. Firing is
//! drift-free: `next_run_at` advances from the previous scheduled time,
//! not from the moment the ticker happened to fire, with a catch-up
//! loop so a stalled scheduler fires a late task once and realigns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use conductor_core::{CronSchedule, ScheduledTask, TaskStatus, WorkflowExecution};

use crate::config::SchedulerConfig;
use crate::engine::WorkflowEngine;
use crate::error::OrchestratorError;

/// Schedule creation request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    /// Human-readable task name.
    pub name: String,
    /// Five-field cron expression.
    pub cron_expr: String,
    /// Workflow to trigger on each firing.
    pub workflow_id: String,
    /// Execution input for each triggered run.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// A task plus its parsed schedule, kept together so the ticker never
/// re-parses.
struct TaskEntry {
    task: ScheduledTask,
    schedule: CronSchedule,
}

/// Cron task scheduler over the workflow engine.
pub struct TaskScheduler {
    engine: Arc<WorkflowEngine>,
    tasks: DashMap<String, TaskEntry>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Creates a scheduler. Nothing ticks until [`Self::spawn`].
    #[must_use]
    pub fn new(engine: Arc<WorkflowEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            tasks: DashMap::new(),
            config,
        }
    }

    /// Validates and stores a scheduled task, Active with its first
    /// `next_run_at` computed from now.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty name, `InvalidCronExpression` for a
    /// bad cron expression, `WorkflowNotFound` for an unknown workflow.
    pub fn schedule(&self, req: ScheduleRequest) -> Result<ScheduledTask, OrchestratorError> {
        if req.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "task name must be non-empty".to_string(),
            ));
        }
        let schedule = CronSchedule::parse(&req.cron_expr)?;
        self.engine.get_workflow(&req.workflow_id)?;

        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            cron_expr: req.cron_expr,
            workflow_id: req.workflow_id,
            parameters: req.parameters,
            status: TaskStatus::Active,
            last_run_at: None,
            next_run_at: schedule.next_after(Utc::now()),
        };
        info!(
            task_id = %task.id,
            name = %task.name,
            cron = %task.cron_expr,
            next_run_at = ?task.next_run_at,
            "task scheduled"
        );
        self.tasks.insert(
            task.id.clone(),
            TaskEntry {
                task: task.clone(),
                schedule,
            },
        );
        Ok(task)
    }

    /// Removes a task, returning its final record.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for an unknown id.
    pub fn cancel(&self, task_id: &str) -> Result<ScheduledTask, OrchestratorError> {
        let Some((_, entry)) = self.tasks.remove(task_id) else {
            return Err(OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            });
        };
        info!(task_id, "task cancelled");
        Ok(entry.task)
    }

    /// Fires a task immediately. `next_run_at` is untouched; only
    /// `last_run_at` records the manual firing.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` for an unknown id, plus anything
    /// [`WorkflowEngine::execute`] returns.
    pub fn trigger_now(&self, task_id: &str) -> Result<WorkflowExecution, OrchestratorError> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| {
            OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            }
        })?;

        let execution = self
            .engine
            .execute(&entry.task.workflow_id, entry.task.parameters.clone())?;
        entry.task.last_run_at = Some(Utc::now());
        info!(task_id, execution_id = %execution.id, "task triggered manually");
        Ok(execution)
    }

    /// Pauses a task: it stays listed but the ticker skips it.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for an unknown id.
    pub fn pause(&self, task_id: &str) -> Result<ScheduledTask, OrchestratorError> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| {
            OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            }
        })?;
        entry.task.status = TaskStatus::Paused;
        info!(task_id, "task paused");
        Ok(entry.task.clone())
    }

    /// Resumes a paused task. Firings missed while paused are dropped:
    /// `next_run_at` is recomputed from now.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for an unknown id.
    pub fn resume(&self, task_id: &str) -> Result<ScheduledTask, OrchestratorError> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| {
            OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            }
        })?;
        entry.task.status = TaskStatus::Active;
        entry.task.next_run_at = entry.schedule.next_after(Utc::now());
        info!(task_id, next_run_at = ?entry.task.next_run_at, "task resumed");
        Ok(entry.task.clone())
    }

    /// Fetches one task.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<ScheduledTask> {
        self.tasks.get(task_id).map(|e| e.task.clone())
    }

    /// Every scheduled task.
    #[must_use]
    pub fn list(&self) -> Vec<ScheduledTask> {
        self.tasks.iter().map(|e| e.task.clone()).collect()
    }

    /// Number of scheduled tasks.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tasks.len()
    }

    /// Evaluates every task against `now`, firing the due ones once and
    /// advancing their `next_run_at` from the scheduled time. Returns
    /// the number of tasks fired.
    pub fn tick_once(&self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        for mut entry in self.tasks.iter_mut() {
            if entry.task.status != TaskStatus::Active {
                continue;
            }
            let Some(due) = entry.task.next_run_at else {
                continue;
            };
            if due > now {
                continue;
            }

            match self
                .engine
                .execute(&entry.task.workflow_id, entry.task.parameters.clone())
            {
                Ok(execution) => {
                    fired += 1;
                    counter!("conductor_tasks_fired_total").increment(1);
                    debug!(
                        task_id = %entry.task.id,
                        execution_id = %execution.id,
                        "task fired"
                    );
                }
                Err(error) => {
                    // The task stays scheduled; the workflow may come
                    // back before the next firing.
                    warn!(task_id = %entry.task.id, %error, "task firing failed");
                }
            }
            entry.task.last_run_at = Some(now);

            // Advance from the scheduled time, catching up past any
            // firings missed while stalled. A late fire happens once.
            let mut next = entry.schedule.next_after(due);
            while let Some(candidate) = next {
                if candidate > now {
                    break;
                }
                next = entry.schedule.next_after(candidate);
            }
            entry.task.next_run_at = next;
        }
        fired
    }

    /// Starts the ticker loop. Runs until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(interval = ?self.config.tick_interval, "task scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick_once(Utc::now());
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("task scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
