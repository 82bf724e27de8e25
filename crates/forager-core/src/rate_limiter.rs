//! Process-wide request rate limiting for tool invocations.
//!
//! Every job in the process shares one [`RateLimiter`] (cloning the handle
//! shares the underlying state), so the configured rate is a global ceiling
//! on how often tools may *start* work, regardless of which job asks.
//!
//! # Example
//!
//! ```rust,no_run
//! use forager_core::rate_limiter::RateLimiter;
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(5.0);
//! let body = limiter.execute(|| async { "fetched" }).await;
//! assert_eq!(body, "fetched");
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct LimiterState {
    /// Minimum spacing between two starts; `None` disables limiting.
    interval: Option<Duration>,
    /// Earliest instant the next caller may start.
    next_slot: Option<Instant>,
}

/// Shared limiter that spaces out the start of async units of work.
///
/// The limiter only delays start times. It never retries, reorders by
/// priority, or swallows the outcome of the wrapped work.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
}

/// Slowest rate the limiter enforces: one start per day.
pub const MIN_RATE_LIMIT_RPS: f64 = 1.0 / 86_400.0;

/// Longest spacing between two starts; slower rates are clamped to it.
const MAX_INTERVAL: Duration = Duration::from_secs(86_400);

fn interval_for(rps: f64) -> Option<Duration> {
    if !(rps.is_finite() && rps > 0.0) {
        return None;
    }
    let interval =
        Duration::try_from_secs_f64(1.0 / rps).map_or(MAX_INTERVAL, |i| i.min(MAX_INTERVAL));
    Some(interval)
}

impl RateLimiter {
    /// Create a limiter allowing `rps` starts per second.
    ///
    /// A non-positive or non-finite rate disables limiting. Rates below
    /// [`MIN_RATE_LIMIT_RPS`] are clamped to it.
    pub fn new(rps: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                interval: interval_for(rps),
                next_slot: None,
            })),
        }
    }

    /// Change the rate; applies to every subsequent `execute` call.
    pub async fn set_rate_limit(&self, rps: f64) {
        let mut state = self.state.lock().await;
        state.interval = interval_for(rps);
        tracing::debug!(rps, "Rate limit updated");
    }

    /// Current rate in requests per second, `None` when unlimited.
    pub async fn rate_limit(&self) -> Option<f64> {
        let state = self.state.lock().await;
        state.interval.map(|i| 1.0 / i.as_secs_f64())
    }

    /// Wait for a free slot, then run `f` and return its output unchanged.
    pub async fn execute<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        f().await
    }

    /// Reserve the next start slot and sleep until it arrives.
    async fn acquire(&self) {
        let slot = {
            let mut state = self.state.lock().await;
            let Some(interval) = state.interval else {
                return;
            };
            let now = Instant::now();
            let slot = state.next_slot.map_or(now, |next| next.max(now));
            state.next_slot = Some(slot + interval);
            slot
        };

        // Sleep without holding the lock so other callers can queue up.
        let now = Instant::now();
        if slot > now {
            tracing::debug!(
                wait_ms = %(slot - now).as_millis(),
                "Rate limiting tool invocation"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}

impl Default for RateLimiter {
    /// 5 requests per second.
    fn default() -> Self {
        Self::new(5.0)
    }
}
