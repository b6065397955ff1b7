//! Instance selection for outbound dispatch.
//!
//! The balancer narrows the registry's candidates for a logical name to
//! instances that are Healthy and whose circuit breaker for the
//! requested operation is not open, then picks one by strategy. Open
//! breakers are skipped rather than failed on, so a single bad instance
//! never blocks a service with healthy siblings.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use conductor_core::{InstanceStatus, ServiceInstance};

use crate::breaker::BreakerRegistry;
use crate::error::OrchestratorError;
use crate::registry::InstanceRegistry;

/// Candidate selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Rotate through candidates in registration order.
    #[default]
    RoundRobin,
    /// Uniform random pick.
    Random,
    /// Prefer the candidate whose breaker failed longest ago.
    LeastRecentFailure,
}

impl Strategy {
    /// Lowercase wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Random => "random",
            Self::LeastRecentFailure => "least-recent-failure",
        }
    }
}

impl FromStr for Strategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "least-recent-failure" => Ok(Self::LeastRecentFailure),
            other => Err(OrchestratorError::Validation(format!(
                "unknown balancing strategy: {other}"
            ))),
        }
    }
}

/// Picks dispatch targets from the registry.
pub struct LoadBalancer {
    registry: Arc<InstanceRegistry>,
    breakers: Arc<BreakerRegistry>,
    /// Round-robin cursor per logical name.
    cursors: DashMap<String, usize>,
}

impl LoadBalancer {
    /// Creates a balancer over the given registry and breakers.
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            registry,
            breakers,
            cursors: DashMap::new(),
        }
    }

    /// Selects an instance of `logical_name` for `operation`.
    ///
    /// # Errors
    ///
    /// `NoHealthyInstance` when no registered instance of the name is
    /// Healthy; `AllCircuitsOpen` when healthy candidates exist but
    /// every one sits behind an open breaker.
    pub fn pick(
        &self,
        logical_name: &str,
        operation: &str,
        strategy: Strategy,
        now: Instant,
    ) -> Result<ServiceInstance, OrchestratorError> {
        let healthy: Vec<ServiceInstance> = self
            .registry
            .list_by_name(logical_name)
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Healthy)
            .collect();

        if healthy.is_empty() {
            return Err(OrchestratorError::NoHealthyInstance {
                service: logical_name.to_string(),
            });
        }

        let candidates: Vec<ServiceInstance> = healthy
            .into_iter()
            .filter(|i| !self.breakers.is_open(&i.instance_id, operation, now))
            .collect();

        if candidates.is_empty() {
            return Err(OrchestratorError::AllCircuitsOpen {
                service: logical_name.to_string(),
                operation: operation.to_string(),
            });
        }

        let picked = match strategy {
            Strategy::RoundRobin => {
                let mut cursor = self.cursors.entry(logical_name.to_string()).or_insert(0);
                let index = *cursor % candidates.len();
                *cursor = cursor.wrapping_add(1);
                candidates[index].clone()
            }
            Strategy::Random => {
                let index = rand::rng().random_range(0..candidates.len());
                candidates[index].clone()
            }
            Strategy::LeastRecentFailure => {
                // No recorded failure sorts first.
                candidates
                    .iter()
                    .min_by_key(|i| {
                        self.breakers
                            .last_failure(&i.instance_id, operation)
                            .map_or((0, None), |at| (1, Some(at)))
                    })
                    .cloned()
                    .unwrap_or_else(|| candidates[0].clone())
            }
        };

        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::Utc;
    use conductor_core::HealthRecord;

    use crate::config::BreakerConfig;
    use crate::registry::{MemoryRegistryStore, RegisterRequest};

    use super::*;

    fn setup() -> (Arc<InstanceRegistry>, Arc<BreakerRegistry>, LoadBalancer) {
        let registry =
            Arc::new(InstanceRegistry::open(Arc::new(MemoryRegistryStore::new())).unwrap());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let balancer = LoadBalancer::new(registry.clone(), breakers.clone());
        (registry, breakers, balancer)
    }

    fn add_instance(registry: &InstanceRegistry, id: &str, name: &str, healthy: bool) {
        registry
            .register(RegisterRequest {
                instance_id: id.to_string(),
                logical_name: name.to_string(),
                base_url: format!("http://{id}:8080"),
                kind: "ai".to_string(),
                metadata: BTreeMap::new(),
            })
            .unwrap();
        if healthy {
            registry
                .update_health(HealthRecord {
                    instance_id: id.to_string(),
                    status: InstanceStatus::Healthy,
                    latency_ms: Some(5),
                    checked_at: Utc::now(),
                    consecutive_failures: 0,
                })
                .unwrap();
        }
    }

    #[test]
    fn no_instances_is_no_healthy_instance() {
        let (_registry, _breakers, balancer) = setup();
        let err = balancer
            .pick("ghost", "op", Strategy::RoundRobin, Instant::now())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoHealthyInstance { .. }));
    }

    #[test]
    fn unknown_status_instances_are_not_candidates() {
        let (registry, _breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", false);

        let err = balancer
            .pick("a", "op", Strategy::RoundRobin, Instant::now())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoHealthyInstance { .. }));
    }

    #[test]
    fn round_robin_rotates() {
        let (registry, _breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);
        add_instance(&registry, "a-2", "a", true);

        let now = Instant::now();
        let first = balancer.pick("a", "op", Strategy::RoundRobin, now).unwrap();
        let second = balancer.pick("a", "op", Strategy::RoundRobin, now).unwrap();
        let third = balancer.pick("a", "op", Strategy::RoundRobin, now).unwrap();

        assert_ne!(first.instance_id, second.instance_id);
        assert_eq!(first.instance_id, third.instance_id);
    }

    #[test]
    fn open_breaker_falls_through_to_sibling() {
        let (registry, breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);
        add_instance(&registry, "a-2", "a", true);

        let now = Instant::now();
        for _ in 0..5 {
            breakers.on_failure("a-1", "op", now);
        }

        for _ in 0..4 {
            let picked = balancer.pick("a", "op", Strategy::RoundRobin, now).unwrap();
            assert_eq!(picked.instance_id, "a-2");
        }
    }

    #[test]
    fn breaker_isolation_is_per_operation() {
        let (registry, breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);

        let now = Instant::now();
        for _ in 0..5 {
            breakers.on_failure("a-1", "transcribe", now);
        }

        // The same instance remains selectable for other operations.
        let picked = balancer
            .pick("a", "summarize", Strategy::RoundRobin, now)
            .unwrap();
        assert_eq!(picked.instance_id, "a-1");
        let err = balancer
            .pick("a", "transcribe", Strategy::RoundRobin, now)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AllCircuitsOpen { .. }));
    }

    #[test]
    fn all_open_is_distinct_from_no_healthy() {
        let (registry, breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);

        let now = Instant::now();
        for _ in 0..5 {
            breakers.on_failure("a-1", "op", now);
        }

        let err = balancer
            .pick("a", "op", Strategy::RoundRobin, now)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AllCircuitsOpen { .. }));
    }

    #[test]
    fn cooled_breaker_makes_target_selectable_again() {
        let (registry, breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);

        let t0 = Instant::now();
        for _ in 0..5 {
            breakers.on_failure("a-1", "op", t0);
        }
        assert!(balancer.pick("a", "op", Strategy::RoundRobin, t0).is_err());

        let t1 = t0 + Duration::from_secs(31);
        let picked = balancer.pick("a", "op", Strategy::RoundRobin, t1).unwrap();
        assert_eq!(picked.instance_id, "a-1");
    }

    #[test]
    fn random_only_returns_candidates() {
        let (registry, _breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);
        add_instance(&registry, "a-2", "a", true);

        let now = Instant::now();
        for _ in 0..20 {
            let picked = balancer.pick("a", "op", Strategy::Random, now).unwrap();
            assert!(picked.instance_id == "a-1" || picked.instance_id == "a-2");
        }
    }

    #[test]
    fn least_recent_failure_prefers_never_failed() {
        let (registry, breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);
        add_instance(&registry, "a-2", "a", true);

        let now = Instant::now();
        breakers.on_failure("a-1", "op", now);

        let picked = balancer
            .pick("a", "op", Strategy::LeastRecentFailure, now)
            .unwrap();
        assert_eq!(picked.instance_id, "a-2");
    }

    #[test]
    fn least_recent_failure_orders_by_failure_age() {
        let (registry, breakers, balancer) = setup();
        add_instance(&registry, "a-1", "a", true);
        add_instance(&registry, "a-2", "a", true);

        let t0 = Instant::now();
        breakers.on_failure("a-1", "op", t0);
        breakers.on_failure("a-2", "op", t0 + Duration::from_secs(5));

        let picked = balancer
            .pick("a", "op", Strategy::LeastRecentFailure, t0 + Duration::from_secs(10))
            .unwrap();
        assert_eq!(picked.instance_id, "a-1");
    }

    #[test]
    fn strategy_parses_from_wire_names() {
        assert_eq!(
            "round-robin".parse::<Strategy>().unwrap(),
            Strategy::RoundRobin
        );
        assert_eq!("random".parse::<Strategy>().unwrap(), Strategy::Random);
        assert_eq!(
            "least-recent-failure".parse::<Strategy>().unwrap(),
            Strategy::LeastRecentFailure
        );
        assert!("sticky".parse::<Strategy>().is_err());
    }
}
