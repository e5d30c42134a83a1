//! Time source injected into everything that does deadline math.
//!
//! ```text
//!   SystemClock ──► tokio::time (real timers)
//!   ManualClock ──► simulated instant, advanced when a wait is first polled
//! ```
//!
//! `after` is meant to be a `select!` arm (a deadline), `sleep` is an
//! unconditional pause between polls. They behave the same; they are
//! counted separately so tests can tell retries from deadlines.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type ClockFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Resolves once `d` has elapsed.
    fn after(&self, d: Duration) -> ClockFuture;

    /// Pause for `d`.
    fn sleep(&self, d: Duration) -> ClockFuture;
}

/// Wall-clock time backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn after(&self, d: Duration) -> ClockFuture {
        Box::pin(tokio::time::sleep(d))
    }

    fn sleep(&self, d: Duration) -> ClockFuture {
        Box::pin(tokio::time::sleep(d))
    }
}

#[derive(Debug)]
struct ManualState {
    base: Instant,
    offset: Duration,
    afters: usize,
    sleeps: usize,
}

/// Simulated clock for tests. Waits complete immediately and move the
/// simulated instant forward by the requested duration.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                base: Instant::now(),
                offset: Duration::ZERO,
                afters: 0,
                sleeps: 0,
            })),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.offset += d;
        }
    }

    /// Simulated time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().map(|s| s.offset).unwrap_or_default()
    }

    pub fn after_count(&self) -> usize {
        self.state.lock().map(|s| s.afters).unwrap_or_default()
    }

    pub fn sleep_count(&self) -> usize {
        self.state.lock().map(|s| s.sleeps).unwrap_or_default()
    }

    fn wait(&self, d: Duration, is_sleep: bool) -> ClockFuture {
        let state = self.state.clone();
        Box::pin(async move {
            if let Ok(mut state) = state.lock() {
                state.offset += d;
                if is_sleep {
                    state.sleeps += 1;
                } else {
                    state.afters += 1;
                }
            }
        })
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state
            .lock()
            .map(|s| s.base + s.offset)
            .unwrap_or_else(|_| Instant::now())
    }

    fn after(&self, d: Duration) -> ClockFuture {
        self.wait(d, false)
    }

    fn sleep(&self, d: Duration) -> ClockFuture {
        self.wait(d, true)
    }
}
