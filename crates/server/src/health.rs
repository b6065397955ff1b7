//! Active health monitoring of registered instances.
//!
//! A background sweep probes every instance concurrently on a fixed
//! interval. Status transitions use hysteresis: an instance flips to
//! Unhealthy only after `unhealthy_threshold` consecutive probe
//! failures, while a single successful probe flips it back to Healthy.
//! Transitions (and only transitions) are published on a broadcast
//! channel for interested components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use conductor_core::{HealthRecord, InstanceStatus, ServiceInstance};

use crate::config::HealthConfig;
use crate::registry::InstanceRegistry;

/// Outcome of a single probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Whether the instance answered with a passing status.
    pub healthy: bool,
    /// Round-trip latency, when the probe completed.
    pub latency_ms: Option<u64>,
}

/// Probing seam. The HTTP implementation is the production path; tests
/// substitute scripted probes.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Probes one instance, never returning an error: an unreachable
    /// instance is a failed probe, not a monitor failure.
    async fn probe(&self, instance: &ServiceInstance) -> ProbeResult;
}

/// Probes `GET {base_url}/health` with a per-probe timeout. Any non-2xx
/// response, connect error, or timeout counts as a failed probe.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Builds a probe with its own connection pool and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(probe_timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeResult {
        let url = format!("{}/health", instance.base_url.trim_end_matches('/'));
        let started = std::time::Instant::now();
        match self.client.get(&url).send().await {
            Ok(response) => ProbeResult {
                healthy: response.status().is_success(),
                latency_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
            },
            Err(error) => {
                debug!(instance_id = %instance.instance_id, %error, "health probe failed");
                ProbeResult {
                    healthy: false,
                    latency_ms: None,
                }
            }
        }
    }
}

/// Published when an instance's status actually changes.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    /// Logical service name.
    pub logical_name: String,
    /// The instance that transitioned.
    pub instance_id: String,
    /// Status before the transition.
    pub old: InstanceStatus,
    /// Status after the transition.
    pub new: InstanceStatus,
}

/// Sweeps the registry with a probe and applies hysteresis.
pub struct HealthMonitor {
    registry: Arc<InstanceRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
    events: broadcast::Sender<HealthEvent>,
}

impl HealthMonitor {
    /// Creates a monitor. Nothing runs until [`Self::spawn`].
    #[must_use]
    pub fn new(
        registry: Arc<InstanceRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: HealthConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry,
            probe,
            config,
            events,
        }
    }

    /// Subscribes to status transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Probes every registered instance concurrently and applies the
    /// results. Returns the transitions that occurred.
    ///
    /// # Errors
    ///
    /// Returns an error only on a registry store failure; probe
    /// failures are data, not errors.
    pub async fn sweep(&self) -> Result<Vec<HealthEvent>, crate::error::OrchestratorError> {
        let instances = self.registry.list_all();
        gauge!("conductor_registry_instances").set(instances.len() as f64);

        let mut probes = JoinSet::new();
        for instance in instances {
            let probe = self.probe.clone();
            probes.spawn(async move {
                let result = probe.probe(&instance).await;
                (instance, result)
            });
        }

        let mut transitions = Vec::new();
        while let Some(joined) = probes.join_next().await {
            let Ok((instance, result)) = joined else {
                // A panicked probe task; skip this instance this sweep.
                continue;
            };
            if let Some(event) = self.apply(&instance, &result)? {
                transitions.push(event);
            }
        }
        Ok(transitions)
    }

    /// Folds one probe result into the instance's record, honoring the
    /// hysteresis threshold.
    fn apply(
        &self,
        instance: &ServiceInstance,
        result: &ProbeResult,
    ) -> Result<Option<HealthEvent>, crate::error::OrchestratorError> {
        counter!("conductor_health_probes_total").increment(1);

        let previous_failures = self
            .registry
            .health_record(&instance.instance_id)
            .map_or(0, |r| r.consecutive_failures);

        let (status, consecutive_failures) = if result.healthy {
            (InstanceStatus::Healthy, 0)
        } else {
            let failures = previous_failures + 1;
            if failures >= self.config.unhealthy_threshold {
                (InstanceStatus::Unhealthy, failures)
            } else {
                // Below threshold the prior status stands.
                (instance.status, failures)
            }
        };

        self.registry.update_health(HealthRecord {
            instance_id: instance.instance_id.clone(),
            status,
            latency_ms: result.latency_ms,
            checked_at: Utc::now(),
            consecutive_failures,
        })?;

        if status == instance.status {
            return Ok(None);
        }

        let event = HealthEvent {
            logical_name: instance.logical_name.clone(),
            instance_id: instance.instance_id.clone(),
            old: instance.status,
            new: status,
        };
        match status {
            InstanceStatus::Unhealthy => warn!(
                instance_id = %event.instance_id,
                logical_name = %event.logical_name,
                failures = consecutive_failures,
                "instance marked unhealthy"
            ),
            _ => info!(
                instance_id = %event.instance_id,
                logical_name = %event.logical_name,
                from = instance.status.as_str(),
                to = status.as_str(),
                "instance health transition"
            ),
        }
        counter!("conductor_health_transitions_total").increment(1);

        // Nobody listening is fine.
        let _ = self.events.send(event.clone());
        Ok(Some(event))
    }

    /// Starts the sweep loop. Runs until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first interval tick fires immediately; skip it so a
            // freshly registered instance gets its full grace period.
            ticker.tick().await;

            info!(interval = ?self.config.probe_interval, "health monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep().await {
                            warn!(%error, "health sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("health monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::registry::{MemoryRegistryStore, RegisterRequest};

    use super::*;

    /// Probe whose verdict is flipped by the test.
    struct ScriptedProbe {
        healthy: AtomicBool,
    }

    impl ScriptedProbe {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
            })
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _instance: &ServiceInstance) -> ProbeResult {
            ProbeResult {
                healthy: self.healthy.load(Ordering::SeqCst),
                latency_ms: Some(1),
            }
        }
    }

    fn registry_with(ids: &[&str]) -> Arc<InstanceRegistry> {
        let registry =
            Arc::new(InstanceRegistry::open(Arc::new(MemoryRegistryStore::new())).unwrap());
        for id in ids {
            registry
                .register(RegisterRequest {
                    instance_id: (*id).to_string(),
                    logical_name: "svc".to_string(),
                    base_url: format!("http://{id}:8080"),
                    kind: "ai".to_string(),
                    metadata: BTreeMap::new(),
                })
                .unwrap();
        }
        registry
    }

    fn monitor(registry: Arc<InstanceRegistry>, probe: Arc<dyn HealthProbe>) -> HealthMonitor {
        HealthMonitor::new(registry, probe, HealthConfig::default())
    }

    #[tokio::test]
    async fn successful_probe_transitions_unknown_to_healthy() {
        let registry = registry_with(&["a-1"]);
        let monitor = monitor(registry.clone(), ScriptedProbe::new(true));

        let events = monitor.sweep().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old, InstanceStatus::Unknown);
        assert_eq!(events[0].new, InstanceStatus::Healthy);
        assert_eq!(registry.get("a-1").unwrap().status, InstanceStatus::Healthy);
    }

    #[tokio::test]
    async fn hysteresis_requires_consecutive_failures() {
        let registry = registry_with(&["a-1"]);
        let probe = ScriptedProbe::new(true);
        let monitor = monitor(registry.clone(), probe.clone());

        monitor.sweep().await.unwrap();
        probe.set_healthy(false);

        // Two failures: status holds at Healthy.
        monitor.sweep().await.unwrap();
        monitor.sweep().await.unwrap();
        assert_eq!(registry.get("a-1").unwrap().status, InstanceStatus::Healthy);
        assert_eq!(
            registry.health_record("a-1").unwrap().consecutive_failures,
            2
        );

        // Third consecutive failure flips it.
        let events = monitor.sweep().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new, InstanceStatus::Unhealthy);
        assert_eq!(
            registry.get("a-1").unwrap().status,
            InstanceStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn intervening_success_resets_failure_streak() {
        let registry = registry_with(&["a-1"]);
        let probe = ScriptedProbe::new(true);
        let monitor = monitor(registry.clone(), probe.clone());

        monitor.sweep().await.unwrap();
        probe.set_healthy(false);
        monitor.sweep().await.unwrap();
        monitor.sweep().await.unwrap();

        probe.set_healthy(true);
        monitor.sweep().await.unwrap();
        assert_eq!(
            registry.health_record("a-1").unwrap().consecutive_failures,
            0
        );

        // The streak starts over: two more failures do not flip it.
        probe.set_healthy(false);
        monitor.sweep().await.unwrap();
        monitor.sweep().await.unwrap();
        assert_eq!(registry.get("a-1").unwrap().status, InstanceStatus::Healthy);
    }

    #[tokio::test]
    async fn single_success_recovers_unhealthy_instance() {
        let registry = registry_with(&["a-1"]);
        let probe = ScriptedProbe::new(false);
        let monitor = monitor(registry.clone(), probe.clone());

        for _ in 0..3 {
            monitor.sweep().await.unwrap();
        }
        assert_eq!(
            registry.get("a-1").unwrap().status,
            InstanceStatus::Unhealthy
        );

        probe.set_healthy(true);
        let events = monitor.sweep().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new, InstanceStatus::Healthy);
    }

    #[tokio::test]
    async fn steady_state_emits_no_events() {
        let registry = registry_with(&["a-1"]);
        let monitor = monitor(registry.clone(), ScriptedProbe::new(true));

        monitor.sweep().await.unwrap();
        let events = monitor.sweep().await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn events_broadcast_to_subscribers() {
        let registry = registry_with(&["a-1"]);
        let monitor = monitor(registry.clone(), ScriptedProbe::new(true));
        let mut rx = monitor.subscribe();

        monitor.sweep().await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.instance_id, "a-1");
        assert_eq!(event.new, InstanceStatus::Healthy);
    }

    #[tokio::test]
    async fn sweep_covers_every_instance() {
        let registry = registry_with(&["a-1", "a-2", "a-3"]);
        let monitor = monitor(registry.clone(), ScriptedProbe::new(true));

        let events = monitor.sweep().await.unwrap();
        assert_eq!(events.len(), 3);
    }
}
