//! Graceful shutdown controller with in-flight task tracking (§5
//! "cooperative shutdown token").
//!
//! Uses `ArcSwap` for lock-free health state transitions and an atomic
//! counter with RAII guards for accurate in-flight tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Daemon health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

/// Coordinates shutdown across every task in the task inventory (§5): hb
/// tx/rx, listener accept loop and worker pool, monitor tick, scheduler,
/// event bus dispatcher. Each task observes `shutdown_receiver()` and
/// holds an `InFlightGuard` for the duration of in-progress work so
/// `wait_for_drain` knows when it is safe to stop.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    #[must_use]
    pub fn health_state_handle(&self) -> Arc<ArcSwap<HealthState>> {
        Arc::clone(&self.health_state)
    }

    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { in_flight: Arc::clone(&self.in_flight) }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Drains for up to `timeout` (default `shutdown_grace`, 5s). Returns
    /// `true` if every in-flight task completed before the deadline.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
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

/// RAII guard that decrements the in-flight counter when dropped, even
/// during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_starting() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
    }

    #[test]
    fn trigger_shutdown_transitions_to_draining() {
        let controller = ShutdownController::new();
        controller.set_ready();
        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = ShutdownController::new();
        let guard = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_drain_immediate_success() {
        let controller = ShutdownController::new();
        controller.set_ready();
        controller.trigger_shutdown();
        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_drain_timeout_with_active_guard() {
        let controller = ShutdownController::new();
        controller.set_ready();
        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();
        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
