use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tokens left for one caller and when they were last topped up.
struct Bucket {
    tokens: f64,
    updated: Instant,
}

struct Buckets {
    by_key: HashMap<String, Bucket>,
    last_sweep: Instant,
}

/// Per-caller token buckets.
///
/// A bucket idle long enough to refill completely is indistinguishable from
/// a fresh one, so [`check`](Self::check) drops such buckets, at most once
/// per refill period. Memory stays bounded by the callers seen in the last
/// refill period.
pub struct RateLimiter {
    burst: f64,
    per_second: f64,
    refill_period: Duration,
    buckets: Mutex<Buckets>,
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

impl RateLimiter {
    /// Allows `burst` requests at once per caller, refilled at `per_second`.
    pub fn new(burst: f64, per_second: f64) -> Self {
        Self {
            burst,
            per_second,
            refill_period: secs(burst / per_second),
            buckets: Mutex::new(Buckets {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Takes one token from `key`'s bucket.
    ///
    /// On refusal, returns how long until the next token is available.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        if now.duration_since(buckets.last_sweep) >= self.refill_period {
            let period = self.refill_period;
            buckets
                .by_key
                .retain(|_, b| now.duration_since(b.updated) < period);
            buckets.last_sweep = now;
        }

        let bucket = buckets.by_key.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            updated: now,
        });
        let refilled = now.duration_since(bucket.updated).as_secs_f64() * self.per_second;
        bucket.tokens = (bucket.tokens + refilled).min(self.burst);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(secs((1.0 - bucket.tokens) / self.per_second))
        }
    }

    /// Callers with a live bucket.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().by_key.len()
    }
}
