// Per-endpoint token buckets gating dispatch

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RateLimitMode;
use crate::constants::{DEFAULT_RATE_LIMITS, FALLBACK_BURST, FALLBACK_RATE};
use crate::core::errors::BridgeError;

/// Outcome of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    /// Seconds until one token will be available.
    Saturated { retry_after: f64 },
}

/// Token bucket: `tokens` grows by `refill_rate` per elapsed second up to
/// `capacity`, and drops by one per admitted request.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_rate,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Refill for elapsed time, then try to take one token.
    pub fn admit(&mut self, now: Instant) -> Admission {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Admission::Admitted
        } else {
            Admission::Saturated {
                retry_after: (1.0 - self.tokens) / self.refill_rate,
            }
        }
    }

    /// Return an unused token. Best effort on cancellation paths.
    pub fn release(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    #[cfg(test)]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Per-bucket limit: requests per second plus burst capacity.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimit {
    pub rate: f64,
    pub burst: u32,
}

/// Rate limiter keyed by endpoint path template.
///
/// Buckets are created lazily; unknown endpoints get the conservative
/// fallback limit. The published table is configuration, not a constant:
/// a YAML document can override any entry.
pub struct RateLimiter {
    limits: HashMap<String, RateLimit>,
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    mode: RateLimitMode,
}

impl RateLimiter {
    pub fn new(mode: RateLimitMode) -> Self {
        let limits = DEFAULT_RATE_LIMITS
            .iter()
            .map(|(path, rate, burst)| {
                (
                    (*path).to_string(),
                    RateLimit {
                        rate: *rate,
                        burst: *burst,
                    },
                )
            })
            .collect();

        Self {
            limits,
            buckets: Mutex::new(HashMap::new()),
            mode,
        }
    }

    /// Load limit overrides from a YAML map of path template to limit.
    pub fn with_overrides_from_file(mut self, path: &Path) -> Result<Self, BridgeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Internal(format!("failed to read rate limits file {:?}: {}", path, e))
        })?;
        let overrides: HashMap<String, RateLimit> = serde_yaml::from_str(&content)
            .map_err(|e| BridgeError::Internal(format!("failed to parse rate limits YAML: {}", e)))?;

        for (key, limit) in overrides {
            if limit.rate <= 0.0 || limit.burst == 0 {
                warn!(endpoint = %key, "ignoring non-positive rate limit override");
                continue;
            }
            self.limits.insert(key, limit);
        }
        Ok(self)
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                let limit = self.limits.get(key).copied().unwrap_or(RateLimit {
                    rate: FALLBACK_RATE,
                    burst: FALLBACK_BURST,
                });
                debug!(endpoint = %key, rate = limit.rate, burst = limit.burst, "creating rate bucket");
                Arc::new(Mutex::new(TokenBucket::new(limit.burst, limit.rate)))
            })
            .clone()
    }

    /// One admission attempt without waiting.
    pub fn try_admit(&self, key: &str) -> Admission {
        let bucket = self.bucket(key);
        let mut guard = bucket.lock().unwrap_or_else(|e| e.into_inner());
        guard.admit(Instant::now())
    }

    /// Admit a request, either sleeping until a token refills (wait mode)
    /// or failing fast with a retry hint.
    pub async fn acquire(&self, key: &str) -> Result<(), BridgeError> {
        loop {
            match self.try_admit(key) {
                Admission::Admitted => return Ok(()),
                Admission::Saturated { retry_after } => match self.mode {
                    RateLimitMode::FailFast => {
                        return Err(BridgeError::RateLimitExceeded { retry_after });
                    }
                    RateLimitMode::Wait => {
                        debug!(endpoint = %key, wait_secs = retry_after, "rate bucket empty, waiting");
                        tokio::time::sleep(Duration::from_secs_f64(retry_after.max(0.01))).await;
                    }
                },
            }
        }
    }

    /// Return a token acquired for a request that was never sent.
    pub fn release(&self, key: &str) {
        let bucket = self.bucket(key);
        let mut guard = bucket.lock().unwrap_or_else(|e| e.into_inner());
        guard.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_admits_up_to_burst() {
        let mut bucket = TokenBucket::new(3, 1.0);
        let now = Instant::now();
        assert_eq!(bucket.admit(now), Admission::Admitted);
        assert_eq!(bucket.admit(now), Admission::Admitted);
        assert_eq!(bucket.admit(now), Admission::Admitted);
        match bucket.admit(now) {
            Admission::Saturated { retry_after } => assert!(retry_after > 0.0),
            other => panic!("expected saturation, got {:?}", other),
        }
    }

    #[test]
    fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 2.0);
        let start = Instant::now();
        assert_eq!(bucket.admit(start), Admission::Admitted);
        assert!(matches!(bucket.admit(start), Admission::Saturated { .. }));
        // Half a second at 2 tokens/s restores a full token.
        assert_eq!(
            bucket.admit(start + Duration::from_millis(500)),
            Admission::Admitted
        );
    }

    #[test]
    fn bucket_never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(2, 100.0);
        let start = Instant::now();
        // A long quiet period must not stockpile more than capacity.
        assert_eq!(bucket.admit(start + Duration::from_secs(60)), Admission::Admitted);
        assert_eq!(bucket.admit(start + Duration::from_secs(60)), Admission::Admitted);
        assert!(matches!(
            bucket.admit(start + Duration::from_secs(60)),
            Admission::Saturated { .. }
        ));
    }

    #[test]
    fn release_returns_token() {
        let mut bucket = TokenBucket::new(1, 0.001);
        let now = Instant::now();
        assert_eq!(bucket.admit(now), Admission::Admitted);
        bucket.release();
        assert_eq!(bucket.admit(now), Admission::Admitted);
    }

    #[tokio::test]
    async fn fail_fast_yields_rate_limit_error() {
        let limiter = RateLimiter::new(RateLimitMode::FailFast);
        // Fallback bucket: 10 burst.
        for _ in 0..10 {
            limiter.acquire("/unknown/endpoint").await.unwrap();
        }
        let err = limiter.acquire("/unknown/endpoint").await.unwrap_err();
        assert_eq!(err.code(), "rate_limit_exceeded");
        assert!(err.retry_after().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn configured_limits_are_used() {
        let limiter = RateLimiter::new(RateLimitMode::FailFast);
        // Orders: burst 20, then saturated (refill is ~1/minute).
        for _ in 0..20 {
            limiter.acquire(crate::constants::paths::ORDERS).await.unwrap();
        }
        assert!(limiter
            .acquire(crate::constants::paths::ORDERS)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn wait_mode_eventually_admits() {
        let limiter = RateLimiter::new(RateLimitMode::Wait);
        // Fallback bucket: burst 10, refill 5/s. The eleventh acquisition
        // waits ~200ms for a token instead of failing.
        for _ in 0..11 {
            limiter.acquire("/wait/test").await.unwrap();
        }
    }
}
