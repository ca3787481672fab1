//! Token-bucket rate limiter for outbound source requests.
//!
//! Every attempt, including retries, takes one token. Tokens refill
//! continuously at `per_second` up to `burst`. When the bucket is empty the
//! caller reserves the next token and sleeps until it is due, so waiters are
//! served in arrival order and concurrent callers never exceed the rate.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Shared token bucket. Thread-safe: state is protected by a mutex.
#[derive(Debug)]
pub struct RateLimiter {
    per_second: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Available tokens. Negative when tokens have been reserved ahead.
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter admitting `per_second` requests with bursts of `burst`.
    ///
    /// Both values are clamped to at least 1.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            per_second: f64::from(per_second.max(1)),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Reserve one token and return how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.per_second).min(self.burst);
        state.last_refill = now;

        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.per_second)
        }
    }

    /// Wait for a token. Returns [`Error::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let wait = self.reserve();
        if wait.is_zero() {
            return Ok(());
        }

        tracing::trace!("Rate limited, waiting {:?}", wait);
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => {
                self.release();
                Err(Error::Cancelled)
            }
        }
    }

    /// Return a reserved token that was never used.
    fn release(&self) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + 1.0).min(self.burst);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10, 10)
    }
}
