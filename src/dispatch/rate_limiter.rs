//! Sliding-window admission control, one bucket per tool name.
//!
//! Each bucket keeps the instants of calls admitted within the trailing
//! window. Stale entries are purged lazily on every check, and state is only
//! recorded when a call is admitted.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admitted calls per key within `window`.
    pub max_calls: usize,
    /// Trailing window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 60,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// Checks `key` against its bucket as of `now`.
    ///
    /// An entry whose age equals the window is already expired, so exactly
    /// `max_calls` admissions fit in any window of that length.
    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(key.to_string()).or_default();

        while let Some(oldest) = bucket.front() {
            if now.saturating_duration_since(*oldest) >= self.config.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.config.max_calls {
            return Admission::Rejected;
        }

        bucket.push_back(now);
        Admission::Accepted
    }

    /// Number of admitted calls currently recorded for `key`, without purging.
    pub fn recorded(&self, key: &str) -> usize {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.get(key).map(VecDeque::len).unwrap_or(0)
    }
}
