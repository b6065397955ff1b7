//! Orchestrator configuration.
//!
//! Component-level knobs with the documented defaults. The network
//! layer has its own configuration in [`crate::network::config`].

use std::time::Duration;

/// Health monitor settings.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between probe sweeps.
    pub probe_interval: Duration,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Consecutive failures before an instance flips to unhealthy.
    /// Hysteresis: a single transient failure never flips status.
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
        }
    }
}

/// Circuit breaker settings, applied per `(target, operation)` key.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the window before the breaker opens.
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted.
    pub window: Duration,
    /// Time an open breaker waits before admitting a half-open trial.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrently running steps per execution.
    pub per_execution_fanout: usize,
    /// Maximum concurrently running steps across all executions.
    pub global_fanout: usize,
    /// Backoff unit: attempt N sleeps `N * backoff_base`, capped.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff sleep.
    pub backoff_cap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_execution_fanout: 8,
            global_fanout: 64,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

/// Task scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Resolution of the due-task evaluation ticker.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Health monitor settings.
    pub health: HealthConfig,
    /// Circuit breaker settings.
    pub breaker: BreakerConfig,
    /// Workflow engine settings.
    pub engine: EngineConfig,
    /// Task scheduler settings.
    pub scheduler: SchedulerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_defaults() {
        let config = HealthConfig::default();
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.unhealthy_threshold, 3);
    }

    #[test]
    fn breaker_defaults() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.per_execution_fanout, 8);
        assert_eq!(config.global_fanout, 64);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_cap, Duration::from_secs(10));
    }

    #[test]
    fn scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }
}
