//! Per-client token bucket for the WhatsApp ingest endpoint. Buckets refill
//! continuously at `per_minute / 60` tokens per second up to `burst`; an
//! empty bucket answers with how long until one token is back.

use std::time::Instant;

use dashmap::DashMap;

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            per_second: f64::from(per_minute.max(1)) / 60.0,
            burst: f64::from(burst.max(1)),
        }
    }

    /// Takes one token for `key`. `Err(retry_after_secs)` when exhausted.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });
        let elapsed = now.duration_since(entry.last_refill).as_secs_f64();
        entry.tokens = (entry.tokens + elapsed * self.per_second).min(self.burst);
        entry.last_refill = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - entry.tokens;
            let wait = (missing / self.per_second).ceil().max(1.0) as u64;
            Err(wait)
        }
    }
}
