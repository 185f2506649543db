//! Request pacing for the external catalog
//!
//! The catalog requires a minimum interval between physical requests. One
//! [`RateLimiter`] instance is shared by every caller of a client, and the
//! clock is injected so pacing can be tested without sleeping.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Monotonic time source
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall clock backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Enforces a minimum interval between consecutive requests
///
/// The lock is held while sleeping, so concurrent callers queue up and are
/// released one interval apart.
pub struct RateLimiter<C: Clock = TokioClock> {
    clock: C,
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter<TokioClock> {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, TokioClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            clock,
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may be sent
    ///
    /// Returns how long the caller was suspended.
    pub async fn wait(&self) -> Duration {
        let mut last = self.last_request.lock().await;

        let mut waited = Duration::ZERO;
        if let Some(last_time) = *last {
            let elapsed = self.clock.now().saturating_duration_since(last_time);
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", waited);
                self.clock.sleep(waited).await;
            }
        }

        *last = Some(self.clock.now());
        waited
    }
}
