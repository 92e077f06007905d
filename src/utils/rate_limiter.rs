//! Token bucket pacing outbound history requests
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: u32,
    refill_every: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// One token per `1 / requests_per_second`, bursting up to one second's worth
    pub fn new(requests_per_second: u32) -> Self {
        let rate = requests_per_second.max(1);
        RateLimiter {
            capacity: rate,
            // Above 1e9/s the per-token interval would round down to zero
            refill_every: (Duration::from_secs(1) / rate).max(Duration::from_nanos(1)),
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to acquire a token, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then acquire it
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire().await {
                return;
            }
            tokio::time::sleep(self.refill_every.min(Duration::from_millis(100))).await;
        }
    }

    /// Get current available tokens
    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let elapsed = bucket.last_refill.elapsed();
        if elapsed < self.refill_every {
            return;
        }

        let periods = u32::try_from(elapsed.as_nanos() / self.refill_every.as_nanos())
            .unwrap_or(u32::MAX);
        bucket.tokens = bucket.tokens.saturating_add(periods).min(self.capacity);
        // Carry the fractional period over instead of dropping it
        bucket.last_refill += self.refill_every * periods;
    }
}
