//! Token-bucket rate limiting for outbound webhook calls.
//!
//! The bucket holds `burst` tokens and refills at `rate` tokens per second;
//! per the delivery contract both are set to the configured
//! `rate_limit_per_second`. Waiting for a token is a suspension point and
//! must observe the caller's cancellation token.

use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use courier_core::error::{AppError, Result};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// An async token bucket with capacity `burst` refilled at `rate`/second.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a bucket with rate and burst both set to `per_second`.
    ///
    /// A rate of zero disables limiting entirely.
    pub fn per_second(per_second: u32) -> Self {
        let rate = f64::from(per_second);
        Self {
            rate,
            burst: rate,
            state: Mutex::new(BucketState { tokens: rate, last_refill: Instant::now() }),
        }
    }

    /// Takes one token, waiting for refill when the bucket is empty.
    ///
    /// # Errors
    ///
    /// Returns `RateLimit` ("rate limit wait cancelled") when `cancel` fires
    /// while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        if self.rate <= 0.0 {
            return Ok(());
        }

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::RateLimit("rate limit wait cancelled".to_string()));
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}
