//! Process-wide fetch rate limiting.
//!
//! A single [`RateLimiter`] is shared by every worker in a batch, so the
//! effective fetch rate of the whole pool never exceeds one fetch per
//! configured interval. [`RateLimitedFetcher`] wraps any [`Fetcher`] so that
//! each call passes through the limiter and is bounded by its timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use hermes_core::throttle::{RateLimiter, RateLimitedFetcher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! # use hermes_core::traits::Fetcher;
//! # use hermes_core::models::Document;
//! # #[derive(Clone)] struct MyFetcher;
//! # impl Fetcher for MyFetcher {
//! #     async fn fetch(&self, _: &str, _: Duration) -> Result<Document, hermes_core::error::FetchError> { todo!() }
//! # }
//! let limiter = RateLimiter::new(Duration::from_secs(5));
//! let fetcher = RateLimitedFetcher::new(MyFetcher, limiter);
//! let _doc = fetcher.fetch("https://example.com/item/1.html", Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::Document;
use crate::traits::Fetcher;

/// Enforces a minimum interval between consecutive acquisitions.
///
/// Clones share the same state. Waiters are served first-come-first-served
/// because the lock is held while sleeping and tokio's mutex is fair.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_acquire: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// A zero interval disables limiting.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_acquire: Arc::new(Mutex::new(None)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until the interval has elapsed since the previous acquisition
    /// returned, then record now as the last acquisition.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut last = self.last_acquire.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                tracing::debug!(wait_ms = %wait.as_millis(), "Rate limiting fetch");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// A [`Fetcher`] wrapper that rate-limits and time-bounds every call.
#[derive(Clone)]
pub struct RateLimitedFetcher<F> {
    inner: F,
    limiter: RateLimiter,
}

impl<F: Fetcher> RateLimitedFetcher<F> {
    pub fn new(inner: F, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }
}

impl<F: Fetcher> Fetcher for RateLimitedFetcher<F> {
    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Document, FetchError> {
        self.limiter.acquire().await;

        match tokio::time::timeout(timeout, self.inner.fetch(address, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::timeout(
                address,
                format!("no document within {}ms", timeout.as_millis()),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Jitter based on std, avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

/// Uniform-ish random duration in `[0, max)`.
pub fn jitter(max: Duration) -> Duration {
    Duration::from_millis(rand_jitter_ms(max.as_millis() as u64))
}

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    // Seed from high-resolution clock: good enough for jitter, not crypto.
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
