//! Application assembly.
//!
//! Wires the registry, breakers, balancer, engine, scheduler, and
//! health monitor into one bundle, then runs the HTTP layer with
//! background workers tied to its shutdown controller.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::balancer::{LoadBalancer, Strategy};
use crate::breaker::BreakerRegistry;
use crate::config::OrchestratorConfig;
use crate::engine::WorkflowEngine;
use crate::health::{HealthMonitor, HttpHealthProbe};
use crate::invoke::HttpInvoker;
use crate::network::{NetworkConfig, NetworkModule};
use crate::registry::{InstanceRegistry, RegistryStore};
use crate::scheduler::TaskScheduler;

/// The assembled orchestrator components, pre-serving.
pub struct OrchestratorApp {
    /// Service instance registry.
    pub registry: Arc<InstanceRegistry>,
    /// Workflow definitions and executions.
    pub engine: Arc<WorkflowEngine>,
    /// Cron-scheduled workflow triggers.
    pub scheduler: Arc<TaskScheduler>,
    /// Health probe sweeper.
    pub monitor: Arc<HealthMonitor>,
}

impl OrchestratorApp {
    /// Builds the application with the round-robin balancer default.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry store cannot be read or the
    /// HTTP clients cannot be constructed.
    pub fn build(
        config: OrchestratorConfig,
        store: Arc<dyn RegistryStore>,
    ) -> anyhow::Result<Self> {
        Self::build_with_strategy(config, store, Strategy::default())
    }

    /// Builds the application with an explicit balancing strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry store cannot be read or the
    /// HTTP clients cannot be constructed.
    pub fn build_with_strategy(
        config: OrchestratorConfig,
        store: Arc<dyn RegistryStore>,
        strategy: Strategy,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(InstanceRegistry::open(store)?);
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
        ));
        let invoker = Arc::new(HttpInvoker::new()?);
        let engine = Arc::new(WorkflowEngine::new(
            balancer,
            breakers,
            invoker,
            strategy,
            config.engine.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&engine),
            config.scheduler.clone(),
        ));
        let probe = Arc::new(HttpHealthProbe::new(config.health.probe_timeout)?);
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            probe,
            config.health.clone(),
        ));

        info!(strategy = strategy.as_str(), "orchestrator assembled");
        Ok(Self {
            registry,
            engine,
            scheduler,
            monitor,
        })
    }

    /// Binds the HTTP listener, spawns the health monitor and scheduler
    /// against its shutdown controller, and serves until `shutdown`
    /// resolves. Background workers stop when the drain begins.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn run(
        self,
        network: NetworkConfig,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let mut module = NetworkModule::new(
            network,
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            Arc::clone(&self.scheduler),
        );
        let port = module.start().await?;
        info!(port, "orchestrator listening");

        let shutdown_rx = module.shutdown_controller().shutdown_receiver();
        Arc::clone(&self.monitor).spawn(shutdown_rx.clone());
        Arc::clone(&self.scheduler).spawn(shutdown_rx);

        module.serve(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use conductor_core::ServiceInstance;

    use crate::registry::{MemoryRegistryStore, RegisterRequest};

    use super::*;

    fn request(id: &str) -> RegisterRequest {
        RegisterRequest {
            instance_id: id.to_string(),
            logical_name: "billing".to_string(),
            kind: "api".to_string(),
            base_url: format!("http://127.0.0.1:9000/{id}"),
            metadata: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn build_wires_all_components() {
        let app = OrchestratorApp::build(
            OrchestratorConfig::default(),
            Arc::new(MemoryRegistryStore::new()),
        )
        .unwrap();

        assert_eq!(app.registry.count(), 0);
        assert_eq!(app.engine.workflow_count(), 0);
        assert_eq!(app.scheduler.count(), 0);
    }

    #[test]
    fn components_share_the_registry() {
        let app = OrchestratorApp::build(
            OrchestratorConfig::default(),
            Arc::new(MemoryRegistryStore::new()),
        )
        .unwrap();

        let instance: ServiceInstance = app.registry.register(request("billing-1")).unwrap();
        assert_eq!(instance.logical_name, "billing");
        assert_eq!(app.registry.count(), 1);
    }

    #[test]
    fn build_accepts_explicit_strategy() {
        let app = OrchestratorApp::build_with_strategy(
            OrchestratorConfig::default(),
            Arc::new(MemoryRegistryStore::new()),
            Strategy::Random,
        )
        .unwrap();
        assert_eq!(app.engine.workflow_count(), 0);
    }
}
