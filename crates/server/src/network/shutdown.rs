//! Graceful shutdown coordination.
//!
//! One controller owns the server health state machine (Starting ->
//! Ready -> Draining -> Stopped) behind an `ArcSwap` for lock-free
//! reads, a watch channel that background workers (health monitor,
//! scheduler, serve loop) select on, and an atomic in-flight counter
//! with RAII guards so draining can account for requests accurately
//! even when a handler panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Initializing; not yet accepting requests.
    Starting,
    /// Fully operational.
    Ready,
    /// Shutdown triggered; in-flight requests finishing, nothing new
    /// accepted.
    Draining,
    /// All in-flight requests completed.
    Stopped,
}

impl HealthState {
    /// Lowercase wire representation for the health endpoint.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates graceful shutdown across the orchestrator.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    /// Marks the server ready to accept requests.
    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Subscribes a background worker to the shutdown signal.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Moves to `Draining` and notifies every subscriber.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(HealthState::Draining));
        // Receivers may already be gone.
        let _ = self.signal.send(true);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// RAII guard tracking one in-flight request. The counter drops
    /// with the guard, including during unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until in-flight requests reach zero (transitioning to
    /// `Stopped`, returning true) or the timeout expires (state stays
    /// `Draining`, returning false).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.state.store(Arc::new(HealthState::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
