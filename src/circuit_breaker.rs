//! Circuit breaker guarding the downstream handler chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::clock::{Clock, SystemClock};

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the cooldown elapses.
    Open,
    /// Probe mode allowing a limited number of calls to test recovery.
    HalfOpen,
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    cooldown: Duration,
    half_open_max_probes: usize,
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// Failure threshold must be > 0.
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    /// Cooldown must be > 0.
    #[error("cooldown must be > 0 (got {0:?})")]
    InvalidCooldown(Duration),
    /// Half-open probe limit must be > 0.
    #[error("half_open_max_probes must be > 0 (got {provided})")]
    InvalidHalfOpenLimit { provided: usize },
}

impl CircuitBreakerConfig {
    /// Create a config with validation. Defaults to a single half-open probe.
    pub fn new(
        failure_threshold: usize,
        cooldown: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        let config = Self { failure_threshold, cooldown, half_open_max_probes: 1 };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if self.cooldown.is_zero() {
            return Err(CircuitBreakerError::InvalidCooldown(self.cooldown));
        }
        if self.half_open_max_probes == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        Ok(())
    }

    /// Consecutive failures before opening from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Duration to stay Open before half-open probes.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Maximum concurrent probes while HalfOpen.
    pub fn half_open_max_probes(&self) -> usize {
        self.half_open_max_probes
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: usize,
    last_failure_at: Option<u64>,
    half_open_in_flight: usize,
}

/// Admission decision for one call.
#[derive(Debug)]
pub enum Admission {
    /// Proceed; the outcome must be reported through the pending obligation.
    Allowed(OutcomePending),
    /// Fail fast without invoking the handler.
    Rejected {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }
}

/// Obligation to report an admitted call's outcome back to the breaker.
///
/// Dropping the obligation without recording counts as a failure, so an
/// abandoned or cancelled call can neither leave a half-open probe slot
/// occupied forever nor escape the failure count.
#[derive(Debug)]
pub struct OutcomePending {
    breaker: CircuitBreaker,
    probe: bool,
    recorded: bool,
}

impl OutcomePending {
    /// Report whether the admitted call succeeded.
    pub fn record_outcome(mut self, success: bool) {
        self.recorded = true;
        self.breaker.settle(success, self.probe);
    }
}

impl Drop for OutcomePending {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.settle(false, self.probe);
        }
    }
}

/// Failure-threshold state machine protecting the handler chain from
/// cascading failure.
///
/// Clones share the same underlying state via `Arc`, so all handles observe
/// and affect the same circuit lifecycle. The `{state, failure_count,
/// last_failure_at}` triple lives behind a single mutex: a transition is
/// never partially visible to a concurrent caller.
///
/// The Open→HalfOpen transition is evaluated lazily by the next arriving
/// call rather than by a background timer; a circuit with no traffic stays
/// Open until traffic resumes.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<CircuitInner>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker, validating threshold and cooldown.
    pub fn new(
        failure_threshold: usize,
        cooldown: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        Ok(Self::with_config(CircuitBreakerConfig::new(failure_threshold, cooldown)?))
    }

    /// Create a breaker from an already-validated config.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                half_open_in_flight: 0,
            })),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the maximum number of half-open probes; must be > 0.
    pub fn with_half_open_limit(mut self, limit: usize) -> Result<Self, CircuitBreakerError> {
        if limit == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: limit });
        }
        self.config.half_open_max_probes = limit;
        Ok(self)
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn failure_count(&self) -> usize {
        self.inner.lock().unwrap().failure_count
    }

    pub fn cooldown(&self) -> Duration {
        self.config.cooldown
    }

    /// Decide whether a call may proceed.
    ///
    /// While Open, checks whether the cooldown has elapsed since the last
    /// recorded failure and, if so, moves to HalfOpen before evaluating the
    /// call. While HalfOpen, admits up to the configured probe count.
    pub fn before_call(&self) -> Admission {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().unwrap();

        if inner.state == CircuitState::Open {
            let last = inner.last_failure_at.unwrap_or(0);
            if now.saturating_sub(last) >= self.config.cooldown.as_millis() as u64 {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_in_flight = 0;
                tracing::info!("circuit breaker → half-open");
            } else {
                return Admission::Rejected { retry_after: self.config.cooldown };
            }
        }

        match inner.state {
            CircuitState::Closed => Admission::Allowed(self.pending(false)),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_probes {
                    return Admission::Rejected { retry_after: self.config.cooldown };
                }
                inner.half_open_in_flight += 1;
                tracing::debug!(
                    in_flight = inner.half_open_in_flight,
                    max = self.config.half_open_max_probes,
                    "circuit breaker: half-open probe admitted"
                );
                Admission::Allowed(self.pending(true))
            }
            CircuitState::Open => unreachable!("open state handled above"),
        }
    }

    fn pending(&self, probe: bool) -> OutcomePending {
        OutcomePending { breaker: self.clone(), probe, recorded: false }
    }

    fn settle(&self, success: bool, probe: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().unwrap();

        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        if success {
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.last_failure_at = None;
                    tracing::info!("circuit breaker → closed");
                }
                CircuitState::Closed => {
                    // Only consecutive failures trip the breaker.
                    inner.failure_count = 0;
                }
                CircuitState::Open => {}
            }
            return;
        }

        inner.failure_count += 1;
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    failures = inner.failure_count,
                    "circuit breaker: probe failed → open"
                );
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::error!(
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit breaker → open"
                );
            }
            _ => {}
        }
    }
}
