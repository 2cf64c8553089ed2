//! Sliding-window admission control keyed by client identity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// The call was admitted and recorded against the client's window.
    Allowed {
        /// Configured maximum calls per window, for `X-RateLimit-Limit`.
        limit: u32,
        /// Slots left in the window after this call, for
        /// `X-RateLimit-Remaining`.
        remaining: u32,
        /// Epoch seconds at which the window fully resets, for
        /// `X-RateLimit-Reset`.
        resets_at: u64,
    },
    /// The client exhausted its window.
    Rejected {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        /// Configured maximum calls per window.
        limit: u32,
        /// Epoch seconds at which the window fully resets.
        resets_at: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Sliding-window rate limiter.
///
/// Each client key owns an ordered sequence of call timestamps inside the
/// trailing window; entries older than the window are pruned before every
/// admission check. Clones share the same window map via `Arc`, so every
/// pipeline holding a handle observes the same per-client call history.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Arc<Mutex<HashMap<String, VecDeque<u64>>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `limit` calls per `window`, per client key.
    pub fn new(limit: u32, window: Duration) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::NonPositive { key: "calls_per_window" });
        }
        if window.is_zero() {
            return Err(ConfigError::NonPositive { key: "rate_limit_window" });
        }
        Ok(Self {
            limit,
            window,
            clock: Arc::new(SystemClock),
            windows: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Limiter over the standard one-minute window.
    pub fn per_minute(limit: u32) -> Result<Self, ConfigError> {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Prune the key's window, then admit or reject this call.
    ///
    /// The map lock is held across prune, check, and append, so two
    /// concurrent calls for the same key can never both claim the last
    /// remaining slot. The check is inclusive of the limit: exactly `limit`
    /// prior calls inside the window reject the `limit + 1`-th.
    pub fn check_and_record(&self, client_key: &str) -> RateDecision {
        let now = self.clock.now_millis();
        let window_millis = self.window.as_millis() as u64;
        let resets_at = (now + window_millis) / 1000;

        let mut windows = self.windows.lock().unwrap();
        let calls = windows.entry(client_key.to_string()).or_default();

        let cutoff = now.saturating_sub(window_millis);
        while calls.front().is_some_and(|&recorded| recorded < cutoff) {
            calls.pop_front();
        }

        if calls.len() as u64 >= u64::from(self.limit) {
            tracing::debug!(client_key, limit = self.limit, "rate limit exceeded");
            return RateDecision::Rejected {
                retry_after: self.window,
                limit: self.limit,
                resets_at,
            };
        }

        calls.push_back(now);
        let remaining = self.limit - calls.len() as u32;
        RateDecision::Allowed { limit: self.limit, remaining, resets_at }
    }
}
