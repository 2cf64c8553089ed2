//! Pipeline configuration.
//!
//! Values come from explicit construction or from the process environment
//! (`BOUNCER_*` variables). Invalid values fail construction; nothing is
//! re-validated per call.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::rate_limit::SlidingWindowLimiter;

pub const DEFAULT_CALLS_PER_MINUTE: u32 = 100;
pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

const ENV_CALLS_PER_MINUTE: &str = "BOUNCER_CALLS_PER_MINUTE";
const ENV_FAILURE_THRESHOLD: &str = "BOUNCER_FAILURE_THRESHOLD";
const ENV_COOLDOWN_SECS: &str = "BOUNCER_COOLDOWN_SECS";

/// Errors raised while assembling or validating configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be > 0")]
    NonPositive { key: &'static str },
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("pipeline requires a handler")]
    MissingHandler,
    #[error(transparent)]
    CircuitBreaker(#[from] CircuitBreakerError),
}

/// Process-wide pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Default rate limit applied per client key.
    pub calls_per_minute: u32,
    /// Narrower per-route limits, keyed by route (e.g. `"POST /v1/accounts"`).
    pub route_limits: HashMap<String, u32>,
    /// Consecutive handler failures before the circuit opens.
    pub failure_threshold: usize,
    /// How long an open circuit rejects before probing.
    pub cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: DEFAULT_CALLS_PER_MINUTE,
            route_limits: HashMap::new(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl PipelineConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(calls) = parse_env(ENV_CALLS_PER_MINUTE)? {
            config.calls_per_minute = calls;
        }
        if let Some(threshold) = parse_env(ENV_FAILURE_THRESHOLD)? {
            config.failure_threshold = threshold;
        }
        if let Some(secs) = parse_env::<u64>(ENV_COOLDOWN_SECS)? {
            config.cooldown = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Register a narrower limit for one route.
    pub fn with_route_limit(mut self, route: impl Into<String>, limit: u32) -> Self {
        self.route_limits.insert(route.into(), limit);
        self
    }

    /// Effective rate limit for a route.
    pub fn limit_for(&self, route: &str) -> u32 {
        self.route_limits.get(route).copied().unwrap_or(self.calls_per_minute)
    }

    /// Fail fast on non-positive values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calls_per_minute == 0 {
            return Err(ConfigError::NonPositive { key: "calls_per_minute" });
        }
        if let Some((route, _)) = self.route_limits.iter().find(|(_, limit)| **limit == 0) {
            tracing::error!(%route, "route limit must be > 0");
            return Err(ConfigError::NonPositive { key: "route_limits" });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::NonPositive { key: "failure_threshold" });
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::NonPositive { key: "cooldown" });
        }
        Ok(())
    }

    /// Limiter honoring this config's default limit.
    pub fn default_limiter(&self) -> Result<SlidingWindowLimiter, ConfigError> {
        SlidingWindowLimiter::per_minute(self.calls_per_minute)
    }

    /// Limiter honoring the route's effective limit.
    pub fn limiter_for(&self, route: &str) -> Result<SlidingWindowLimiter, ConfigError> {
        SlidingWindowLimiter::per_minute(self.limit_for(route))
    }

    /// Breaker honoring this config's threshold and cooldown.
    pub fn circuit_breaker(&self) -> Result<CircuitBreaker, ConfigError> {
        Ok(CircuitBreaker::new(self.failure_threshold, self.cooldown)?)
    }
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}
