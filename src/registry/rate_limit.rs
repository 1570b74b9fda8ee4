//! Token bucket limiting the outbound call rate of one client
//!
//! The bucket is the only state shared between concurrent listings against
//! the same client, so it lives behind an async mutex. Waiting happens
//! outside the lock and consumes nothing until a token is actually taken,
//! which makes [`RateLimiter::acquire`] safe to abandon on cancellation.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Slowest refill accepted; lower rates are raised to it
pub const MIN_RATE: f64 = 0.001;

/// Longest single sleep; the bucket is re-checked after it
const MAX_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate` tokens per second, at most `burst` stored. Starts full.
    pub fn new(rate: f64, burst: u32) -> Self {
        let rate = if rate > 0.0 && rate.is_finite() {
            rate.max(MIN_RATE)
        } else {
            1.0
        };
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
    }

    /// Take one token, waiting for the refill when the bucket is empty
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket, Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                refill_wait(1.0 - bucket.tokens, self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token if available right now
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available
    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        bucket.tokens.floor() as u32
    }
}

fn refill_wait(missing: f64, rate: f64) -> Duration {
    Duration::try_from_secs_f64(missing / rate).map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
}
