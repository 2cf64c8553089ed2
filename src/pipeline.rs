//! Interceptor chain composing admission control around a handler.
//!
//! Stage order is fixed at build time: security headers → metrics →
//! authentication → rate limiting → circuit breaking → handler. Rate
//! limiting runs before circuit breaking so callers over quota are rejected
//! cheaply without consuming a half-open probe slot; metrics sit outside
//! both gates so rejected calls are measured too. Any stage may
//! short-circuit by returning a response without calling `next`.

pub mod interceptors;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::Instrument;

use crate::auth::Authenticator;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ConfigError, DEFAULT_CALLS_PER_MINUTE, DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::http::{header, Request, Response};
use crate::metrics::MetricsCollector;
use crate::rate_limit::SlidingWindowLimiter;

use self::interceptors::{
    Authentication, CircuitBreaking, MetricsRecorder, RateLimit, SecurityHeaders,
};

/// Business logic wrapped by the pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        request: &Request,
        ctx: &RequestContext,
    ) -> Result<Response, HandlerError>;
}

/// One stage of the chain, with a uniform `(request, ctx, next)` signature.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response;
}

/// Remainder of the chain after the current stage.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    terminal: &'a Terminal,
}

impl Next<'_> {
    /// Run the remaining stages, ending at the wrapped handler.
    pub async fn run(self, request: Request, ctx: &mut RequestContext) -> Response {
        match self.chain.split_first() {
            Some((stage, rest)) => {
                let next = Next { chain: rest, terminal: self.terminal };
                stage.handle(request, ctx, next).await
            }
            None => self.terminal.invoke(request, ctx).await,
        }
    }
}

/// Innermost stage: invokes the handler, catching its failure exactly once
/// and enforcing the optional deadline.
struct Terminal {
    handler: Arc<dyn Handler>,
    deadline: Option<Duration>,
}

impl Terminal {
    async fn invoke(&self, request: Request, ctx: &RequestContext) -> Response {
        let outcome = match self.deadline {
            Some(limit) => {
                match tokio::time::timeout(limit, self.handler.call(&request, ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(
                            route = %request.route_key(),
                            deadline_millis = limit.as_millis() as u64,
                            "handler deadline exceeded"
                        );
                        return Response::json(504, json!({ "message": "Handler timed out" }));
                    }
                }
            }
            None => self.handler.call(&request, ctx).await,
        };

        match outcome {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    tracing::error!(route = %request.route_key(), "handler failed: {err}");
                } else {
                    tracing::debug!(route = %request.route_key(), "handler rejected call: {err}");
                }
                Response::json(err.status(), json!({ "message": err.message() }))
            }
        }
    }
}

/// Ordered interceptor chain wrapping one handler.
///
/// Built once at startup; every shared state object (limiter, breaker,
/// metrics) is injected, so multiple independent pipelines can coexist in a
/// process, with or without shared resilience state.
pub struct Pipeline {
    chain: Vec<Arc<dyn Interceptor>>,
    terminal: Terminal,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.chain.len())
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run one inbound request through the full chain.
    ///
    /// A fresh [`RequestContext`] is created here and dropped on every exit
    /// path (success, handler failure, or rejection at any gate), so the
    /// identity established for this request cannot outlive it or surface in
    /// another request.
    pub async fn dispatch(&self, request: Request) -> Response {
        let mut ctx = RequestContext::new();
        let correlation_id = ctx.correlation_id().to_string();
        let method = request.method().to_string();
        let path = request.path().to_string();
        let started = Instant::now();
        let span = tracing::info_span!("request", correlation_id = %correlation_id);

        async {
            tracing::info!(%method, %path, "request started");
            let next = Next { chain: self.chain.as_slice(), terminal: &self.terminal };
            let mut response = next.run(request, &mut ctx).await;
            tracing::info!(
                %method,
                %path,
                status = response.status(),
                elapsed_secs = started.elapsed().as_secs_f64(),
                "request completed"
            );
            response.set_header(header::REQUEST_ID, correlation_id.as_str());
            response
        }
        .instrument(span)
        .await
    }
}

/// Assembles a [`Pipeline`], filling unset pieces with defaults.
pub struct PipelineBuilder {
    handler: Option<Arc<dyn Handler>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    rate_limiter: Option<SlidingWindowLimiter>,
    circuit_breaker: Option<CircuitBreaker>,
    metrics: Option<MetricsCollector>,
    security_headers: bool,
    handler_deadline: Option<Duration>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            handler: None,
            authenticator: None,
            rate_limiter: None,
            circuit_breaker: None,
            metrics: None,
            security_headers: true,
            handler_deadline: None,
        }
    }

    /// The wrapped business logic. Required.
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// A handler shared with other pipelines or tests.
    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Identity provider integration. Absent means every request runs
    /// anonymously.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// An authenticator shared with other pipelines.
    pub fn shared_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn rate_limiter(mut self, limiter: SlidingWindowLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Deadline for one handler invocation; expiry yields 504 and counts as
    /// a circuit failure.
    pub fn handler_deadline(mut self, deadline: Duration) -> Self {
        self.handler_deadline = Some(deadline);
        self
    }

    /// Toggle the standard security headers stage (on by default).
    pub fn security_headers(mut self, enabled: bool) -> Self {
        self.security_headers = enabled;
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;
        let rate_limiter = match self.rate_limiter {
            Some(limiter) => limiter,
            None => SlidingWindowLimiter::per_minute(DEFAULT_CALLS_PER_MINUTE)?,
        };
        let circuit_breaker = match self.circuit_breaker {
            Some(breaker) => breaker,
            None => CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)?,
        };
        let metrics = self.metrics.unwrap_or_default();

        let mut chain: Vec<Arc<dyn Interceptor>> = Vec::new();
        if self.security_headers {
            chain.push(Arc::new(SecurityHeaders::new()));
        }
        chain.push(Arc::new(MetricsRecorder::new(metrics)));
        if let Some(authenticator) = self.authenticator {
            chain.push(Arc::new(Authentication::new(authenticator)));
        }
        chain.push(Arc::new(RateLimit::new(rate_limiter)));
        chain.push(Arc::new(CircuitBreaking::new(circuit_breaker)));

        Ok(Pipeline {
            chain,
            terminal: Terminal { handler, deadline: self.handler_deadline },
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
