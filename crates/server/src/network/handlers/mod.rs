//! HTTP handler definitions for the orchestrator API.
//!
//! Defines `AppState` (shared state carried through axum extractors)
//! and re-exports the handler functions used when building the router.

pub mod executions;
pub mod health;
pub mod registry;
pub mod schedules;
pub mod workflows;

pub use executions::{cancel_execution, get_execution, list_executions, retry_execution};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use registry::{deregister_instance, get_instance, list_instances, register_instance};
pub use schedules::{
    create_schedule, delete_schedule, list_schedules, pause_schedule, resume_schedule,
    trigger_schedule,
};
pub use workflows::{create_workflow, execute_workflow, get_workflow, list_workflows};

use std::sync::Arc;
use std::time::Instant;

use crate::engine::WorkflowEngine;
use crate::registry::InstanceRegistry;
use crate::scheduler::TaskScheduler;

use super::shutdown::ShutdownController;

/// Shared application state passed to all handlers via `State`.
/// Everything is behind an `Arc`, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Durable instance registry.
    pub registry: Arc<InstanceRegistry>,
    /// Workflow engine.
    pub engine: Arc<WorkflowEngine>,
    /// Cron task scheduler.
    pub scheduler: Arc<TaskScheduler>,
    /// Graceful shutdown controller.
    pub shutdown: Arc<ShutdownController>,
    /// Process start time, for uptime reporting.
    pub start_time: Instant,
}
