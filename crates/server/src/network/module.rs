//! HTTP server lifecycle with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener,
//! and `serve()` accepts connections until shutdown. The split lets the
//! application wire background workers (health monitor, scheduler) off
//! the shutdown controller between `start()` and `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::engine::WorkflowEngine;
use crate::registry::InstanceRegistry;
use crate::scheduler::TaskScheduler;

use super::config::NetworkConfig;
use super::handlers::{
    cancel_execution, create_schedule, create_workflow, delete_schedule, deregister_instance,
    execute_workflow, get_execution, get_instance, get_workflow, health_handler, list_executions,
    list_instances, list_schedules, list_workflows, liveness_handler, pause_schedule,
    readiness_handler, register_instance, resume_schedule, retry_execution, trigger_schedule,
    AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the orchestrator's HTTP serving lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Creates the module without binding any port. The shutdown
    /// controller is allocated here so background workers can subscribe
    /// before serving starts.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        registry: Arc<InstanceRegistry>,
        engine: Arc<WorkflowEngine>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        let state = AppState {
            registry,
            engine,
            scheduler,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        };
        Self {
            config,
            listener: None,
            state,
        }
    }

    /// Shared handle to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(&self.config, self.state.clone())
    }

    /// Binds the TCP listener, returning the actual bound port (which
    /// differs from the configured one when port 0 is used).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until the `shutdown` future resolves, then drains:
    /// health state moves to Draining, in-flight requests get up to the
    /// drain timeout, and the state settles at Stopped.
    ///
    /// # Errors
    ///
    /// Returns an error on a fatal I/O failure, or if `start()` was not
    /// called first.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = build_router(&self.config, self.state.clone());
        let shutdown_ctrl = Arc::clone(&self.state.shutdown);

        // Readiness probes pass from here on.
        shutdown_ctrl.set_ready();

        if let Some(ref tls) = self.config.tls {
            serve_tls(
                listener,
                router,
                tls,
                shutdown_ctrl,
                self.config.drain_timeout,
                shutdown,
            )
            .await
        } else {
            serve_plain(
                listener,
                router,
                shutdown_ctrl,
                self.config.drain_timeout,
                shutdown,
            )
            .await
        }
    }
}

/// Counts each request toward the drain accounting. The guard drops
/// when the response completes, panics included.
async fn track_in_flight(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let _guard = state.shutdown.in_flight_guard();
    next.run(request).await
}

/// Full route table plus the transport middleware stack.
fn build_router(config: &NetworkConfig, state: AppState) -> Router {
    let layers = build_http_layers(config);

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route(
            "/registry/instances",
            post(register_instance).get(list_instances),
        )
        .route(
            "/registry/instances/{id}",
            get(get_instance).delete(deregister_instance),
        )
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/execute", post(execute_workflow))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/executions/{id}/retry", post(retry_execution))
        .route("/schedules", post(create_schedule).get(list_schedules))
        .route("/schedules/{id}", delete(delete_schedule))
        .route("/schedules/{id}/trigger-now", post(trigger_schedule))
        .route("/schedules/{id}/pause", post(pause_schedule))
        .route("/schedules/{id}/resume", post(resume_schedule))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_in_flight,
        ))
        .layer(layers)
        .with_state(state)
}

/// Plain HTTP serving through axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown_ctrl: Arc<ShutdownController>,
    drain_timeout: std::time::Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    drain(shutdown_ctrl, drain_timeout).await;
    Ok(())
}

/// TLS serving through `axum-server` with rustls, reusing the
/// pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &super::config::TlsConfig,
    shutdown_ctrl: Arc<ShutdownController>,
    drain_timeout: std::time::Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS");

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    drain(shutdown_ctrl, drain_timeout).await;
    Ok(())
}

async fn drain(shutdown_ctrl: Arc<ShutdownController>, timeout: std::time::Duration) {
    shutdown_ctrl.trigger_shutdown();
    if shutdown_ctrl.wait_for_drain(timeout).await {
        info!("drained cleanly");
    } else {
        warn!("drain timeout expired with requests in flight");
    }
}
