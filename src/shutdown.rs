//! Drain coordination for the telemetry receiver.
//!
//! Tracks deliveries that are still being enqueued so the receiver can stop
//! accepting new ones and wait, up to a deadline, for the rest to finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// Drain state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Accepting,
    Draining,
    Closed,
}

/// Result of waiting for in-flight deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut { in_flight: usize },
}

/// Counts in-flight deliveries and gates new ones once draining starts.
pub struct DrainTracker {
    state: RwLock<DrainState>,
    in_flight: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl DrainTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DrainState::Accepting),
            in_flight: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> DrainState {
        *self.state.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == DrainState::Accepting
    }

    /// Register a delivery. Returns None once draining has begun.
    ///
    /// The read lock is held across the increment so `drain` cannot observe
    /// a zero count while a delivery is being admitted.
    pub fn begin(&self) -> Option<InFlightGuard> {
        let state = self.state.read();
        if *state != DrainState::Accepting {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(InFlightGuard {
            counter: Arc::clone(&self.in_flight),
            notify: Arc::clone(&self.notify),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting deliveries and wait for the in-flight ones.
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        *self.state.write() = DrainState::Draining;
        let outcome = self.wait_idle(timeout).await;
        *self.state.write() = DrainState::Closed;
        outcome
    }

    async fn wait_idle(&self, timeout: Duration) -> DrainOutcome {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight() == 0 {
                return DrainOutcome::Drained;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return match self.in_flight() {
                    0 => DrainOutcome::Drained,
                    in_flight => DrainOutcome::TimedOut { in_flight },
                };
            }
        }
    }
}

impl Default for DrainTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight delivery.
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
