//! Rate limiting module to prevent abuse
//!
//! One token bucket per client identity. Buckets are created full on first
//! use and swept away by a background task once they have refilled, so a
//! client that stops writing costs nothing after a while.

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Credit whole tokens earned since the last refill. Integer arithmetic
    /// on the refill interval so that waiting exactly one interval always
    /// earns exactly one token.
    fn refill(&mut self, per_token: Duration, capacity: u32, now: Instant) {
        if self.tokens >= capacity {
            // A full bucket accrues nothing
            self.last_refill = self.last_refill.max(now);
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = elapsed.as_nanos() / per_token.as_nanos().max(1);
        if earned == 0 {
            return;
        }

        let missing = capacity - self.tokens;
        if earned >= missing as u128 {
            self.tokens = capacity;
            self.last_refill = now;
        } else {
            // earned < missing <= u32::MAX
            let earned = earned as u32;
            self.tokens += earned;
            self.last_refill += per_token * earned;
        }
    }

    fn try_take(&mut self) -> bool {
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Per-client token bucket limiter for write operations
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    per_token: Duration,
    burst: u32,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let per_second = if config.per_second.is_finite() && config.per_second > 0.0 {
            config.per_second
        } else {
            f64::MIN_POSITIVE
        };

        Self {
            buckets: RwLock::new(HashMap::new()),
            per_token: Duration::try_from_secs_f64(1.0 / per_second).unwrap_or(Duration::MAX),
            burst: config.burst.max(1),
        }
    }

    /// Time it takes to earn one token back
    pub fn refill_interval(&self) -> Duration {
        self.per_token
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Try to take one token for `client_id`. Never waits: false means the
    /// caller must reject the request.
    pub async fn allow(&self, client_id: &str) -> bool {
        self.allow_at(client_id, Instant::now()).await
    }

    /// [`RateLimiter::allow`] evaluated at a given instant
    pub async fn allow_at(&self, client_id: &str, now: Instant) -> bool {
        // Get-or-create and take happen under one exclusive lock
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(client_id.to_string())
            .or_insert_with(|| TokenBucket::full(self.burst, now));

        bucket.refill(self.per_token, self.burst, now);
        bucket.try_take()
    }

    /// Tokens currently held by a client, None when it has no bucket
    pub async fn remaining_tokens(&self, client_id: &str) -> Option<u32> {
        let buckets = self.buckets.read().await;
        buckets.get(client_id).map(|bucket| {
            let mut bucket = *bucket;
            bucket.refill(self.per_token, self.burst, Instant::now());
            bucket.tokens
        })
    }

    /// Get number of tracked clients
    pub async fn tracked_clients(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Drop every bucket that has refilled completely. Returns how many
    /// were removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// [`RateLimiter::sweep`] evaluated at a given instant
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.refill(self.per_token, self.burst, now);
            bucket.tokens < self.burst
        });
        before - buckets.len()
    }

    /// Start the periodic sweep task
    pub fn start_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = self.sweep().await;
                if removed > 0 {
                    debug!(
                        "Rate limiter sweep removed {} idle buckets, {} remain",
                        removed,
                        self.tracked_clients().await
                    );
                }
            }
        })
    }
}
