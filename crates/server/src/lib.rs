//! Conductor server: service registry, health monitoring, circuit
//! breaking, load-balanced dispatch, workflow execution, and cron
//! scheduling behind an HTTP API.

pub mod app;
pub mod balancer;
pub mod breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod invoke;
pub mod network;
pub mod registry;
pub mod scheduler;

pub use app::OrchestratorApp;
pub use balancer::{LoadBalancer, Strategy};
pub use breaker::{BreakerRegistry, CircuitState};
pub use config::OrchestratorConfig;
pub use engine::WorkflowEngine;
pub use error::OrchestratorError;
pub use health::{HealthMonitor, HealthProbe, HttpHealthProbe};
pub use invoke::{HttpInvoker, ServiceInvoker};
pub use network::{NetworkConfig, NetworkModule};
pub use registry::{InstanceRegistry, MemoryRegistryStore, RedbRegistryStore, RegistryStore};
pub use scheduler::TaskScheduler;
