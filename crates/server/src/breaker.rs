//! Per-target circuit breaking.
//!
//! One state machine per `(target, operation)` key, where the target is
//! an instance id on the dispatch path. Keying per instance (rather
//! than per logical name) is what lets the load balancer fall through
//! to the next candidate when one instance's breaker is open; for a
//! single-instance service the two keyings coincide.
//!
//! State machine:
//! - **Closed** (initial): calls pass through; failures are counted
//!   within a sliding window. At the threshold the breaker opens.
//! - **Open**: calls fast-fail without a downstream attempt until the
//!   cooldown elapses, then the breaker goes half-open.
//! - **HalfOpen**: exactly one trial call is admitted; success closes
//!   the breaker, failure re-opens it with a fresh cooldown.
//!
//! All methods take an explicit `now` so state transitions are testable
//! without sleeping through real cooldowns.

use std::time::Instant;

use dashmap::DashMap;
use metrics::counter;
use tracing::debug;

use crate::config::BreakerConfig;

/// Breaker position in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fast-fail until the cooldown elapses.
    Open,
    /// One trial call decides between `Closed` and `Open`.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

/// Read-only view of one breaker for the balancer and API.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failures inside the current window.
    pub failure_count: u32,
    /// Most recent failure, if any.
    pub last_failure_at: Option<Instant>,
    /// When the breaker last opened, if ever.
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    /// Whether the single half-open trial has been handed out.
    trial_in_flight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// Concurrent map of circuit breakers, keyed by `(target, operation)`.
///
/// Transitions are the sole authority of this type; callers only
/// observe snapshots and report call outcomes.
pub struct BreakerRegistry {
    config: BreakerConfig,
    entries: DashMap<(String, String), BreakerEntry>,
}

impl BreakerRegistry {
    /// Creates an empty registry with the given thresholds.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Asks permission to place a call. `Ok` admits the call (and, in
    /// half-open, claims the single trial slot); `Err` means the caller
    /// must fast-fail with `CircuitOpenError` and make no downstream
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` when the breaker is open (cooldown pending) or
    /// half-open with the trial already claimed.
    pub fn try_acquire(&self, target: &str, operation: &str, now: Instant) -> Result<(), ()> {
        let mut entry = self.entry(target, operation);
        match entry.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled = entry
                    .opened_at
                    .is_some_and(|opened| now.duration_since(opened) >= self.config.cooldown);
                if cooled {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_in_flight = true;
                    debug!(target, operation, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    counter!("conductor_breaker_fast_fail_total").increment(1);
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                if entry.trial_in_flight {
                    counter!("conductor_breaker_fast_fail_total").increment(1);
                    Err(())
                } else {
                    entry.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call outcome.
    pub fn on_success(&self, target: &str, operation: &str, now: Instant) {
        let mut entry = self.entry(target, operation);
        match entry.state {
            CircuitState::Closed => {
                // A success only clears the count once the window has
                // fully elapsed since the last failure; otherwise one
                // success could mask a burst of failures.
                let window_elapsed = entry
                    .last_failure_at
                    .is_none_or(|last| now.duration_since(last) >= self.config.window);
                if window_elapsed {
                    entry.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                debug!(target, operation, "trial call succeeded, closing circuit");
                counter!("conductor_breaker_closed_total").increment(1);
                entry.state = CircuitState::Closed;
                entry.failure_count = 0;
                entry.trial_in_flight = false;
            }
            CircuitState::Open => {
                // Late result from a call admitted before the breaker
                // opened; the cooldown clock is authoritative.
            }
        }
    }

    /// Records a failed call outcome.
    pub fn on_failure(&self, target: &str, operation: &str, now: Instant) {
        let mut entry = self.entry(target, operation);
        match entry.state {
            CircuitState::Closed => {
                // Sliding window: a failure after a quiet window starts
                // a fresh count.
                let expired = entry
                    .last_failure_at
                    .is_some_and(|last| now.duration_since(last) >= self.config.window);
                if expired {
                    entry.failure_count = 0;
                }
                entry.failure_count += 1;
                entry.last_failure_at = Some(now);

                if entry.failure_count >= self.config.failure_threshold {
                    debug!(target, operation, failures = entry.failure_count, "circuit opened");
                    counter!("conductor_breaker_opened_total").increment(1);
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                debug!(target, operation, "trial call failed, re-opening circuit");
                counter!("conductor_breaker_opened_total").increment(1);
                entry.state = CircuitState::Open;
                entry.opened_at = Some(now);
                entry.last_failure_at = Some(now);
                entry.trial_in_flight = false;
            }
            CircuitState::Open => {
                entry.last_failure_at = Some(now);
            }
        }
    }

    /// Whether the balancer should skip this target: open with the
    /// cooldown still pending. A cooled-down breaker is selectable so
    /// the trial call can happen.
    #[must_use]
    pub fn is_open(&self, target: &str, operation: &str, now: Instant) -> bool {
        let Some(entry) = self.entries.get(&key(target, operation)) else {
            return false;
        };
        match entry.state {
            CircuitState::Open => entry
                .opened_at
                .is_none_or(|opened| now.duration_since(opened) < self.config.cooldown),
            CircuitState::HalfOpen => entry.trial_in_flight,
            CircuitState::Closed => false,
        }
    }

    /// Most recent failure time for a target, if any. Drives the
    /// least-recent-failure balancing strategy.
    #[must_use]
    pub fn last_failure(&self, target: &str, operation: &str) -> Option<Instant> {
        self.entries
            .get(&key(target, operation))
            .and_then(|e| e.last_failure_at)
    }

    /// Read-only view of one breaker, if it has ever been touched.
    #[must_use]
    pub fn snapshot(&self, target: &str, operation: &str) -> Option<CircuitSnapshot> {
        self.entries.get(&key(target, operation)).map(|e| CircuitSnapshot {
            state: e.state,
            failure_count: e.failure_count,
            last_failure_at: e.last_failure_at,
            opened_at: e.opened_at,
        })
    }

    fn entry(
        &self,
        target: &str,
        operation: &str,
    ) -> dashmap::mapref::one::RefMut<'_, (String, String), BreakerEntry> {
        self.entries
            .entry(key(target, operation))
            .or_insert_with(BreakerEntry::new)
    }
}

fn key(target: &str, operation: &str) -> (String, String) {
    (target.to_string(), operation.to_string())
}
