//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::shutdown::HealthState;

/// Detailed health JSON. Always 200; the `state` field says whether the
/// orchestrator is actually serving, so monitors can tell "up but
/// draining" from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "instances": state.registry.count(),
        "workflows": state.engine.workflow_count(),
        "executions": state.engine.execution_count(),
        "scheduled_tasks": state.scheduler.count(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: only checks the process answers. Always 200.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when `Ready`, 503 during startup and drain so
/// traffic routes away before shutdown.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use crate::balancer::{LoadBalancer, Strategy};
    use crate::breaker::BreakerRegistry;
    use crate::config::OrchestratorConfig;
    use crate::engine::WorkflowEngine;
    use crate::invoke::HttpInvoker;
    use crate::registry::{InstanceRegistry, MemoryRegistryStore};
    use crate::scheduler::TaskScheduler;

    use super::super::super::shutdown::ShutdownController;
    use super::*;

    fn test_state() -> AppState {
        let config = OrchestratorConfig::default();
        let registry =
            Arc::new(InstanceRegistry::open(Arc::new(MemoryRegistryStore::new())).unwrap());
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let balancer = Arc::new(LoadBalancer::new(registry.clone(), breakers.clone()));
        let engine = Arc::new(WorkflowEngine::new(
            balancer,
            breakers,
            Arc::new(HttpInvoker::new().unwrap()),
            Strategy::RoundRobin,
            config.engine.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(engine.clone(), config.scheduler));
        AppState {
            registry,
            engine,
            scheduler,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_reports_state_and_counts() {
        let state = test_state();
        state.shutdown.set_ready();

        let body = health_handler(State(state)).await.0;
        assert_eq!(body["state"], "ready");
        assert_eq!(body["instances"], 0);
        assert_eq!(body["workflows"], 0);
        assert_eq!(body["scheduled_tasks"], 0);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_draining() {
        let state = test_state();
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let body = health_handler(State(state)).await.0;
        assert_eq!(body["state"], "draining");
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_tracks_lifecycle() {
        let state = test_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
