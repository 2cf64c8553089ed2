//! Built-in pipeline stages.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::auth::Authenticator;
use crate::circuit_breaker::{Admission, CircuitBreaker};
use crate::context::RequestContext;
use crate::http::{header, Request, Response};
use crate::metrics::MetricsCollector;
use crate::pipeline::{Interceptor, Next};
use crate::rate_limit::{RateDecision, SlidingWindowLimiter};

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ("Content-Security-Policy", "default-src 'self'"),
];

/// Adds the standard security headers to every response, including
/// rejections.
pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for SecurityHeaders {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response {
        let mut response = next.run(request, ctx).await;
        for (name, value) in SECURITY_HEADERS {
            if response.header(name).is_none() {
                response.set_header(*name, *value);
            }
        }
        response
    }
}

/// Times every call and feeds the metrics collector.
///
/// Sits outside the admission gates so rejected calls are counted and
/// timed too; stamps `X-Response-Time` on the way out.
pub struct MetricsRecorder {
    metrics: MetricsCollector,
}

impl MetricsRecorder {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Interceptor for MetricsRecorder {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response {
        let route = request.route_key();
        let started = Instant::now();
        let mut response = next.run(request, ctx).await;
        let elapsed = started.elapsed();

        self.metrics.record(&route, elapsed, response.is_error());
        response.set_header(
            header::RESPONSE_TIME,
            format!("{:.3}", elapsed.as_secs_f64()),
        );
        response
    }
}

/// Resolves the caller's identity before the admission gates run.
///
/// A request without a credential proceeds anonymously; authorization
/// decisions belong to the handlers. A presented credential that fails
/// validation is rejected here with 401.
pub struct Authentication {
    authenticator: Arc<dyn Authenticator>,
}

impl Authentication {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Interceptor for Authentication {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response {
        if let Some(credential) = request.bearer_credential().map(str::to_owned) {
            match self.authenticator.validate(&credential).await {
                Some(identity) => {
                    let permissions = self.authenticator.permissions_for(&credential).await;
                    let subject = identity.subject().to_string();
                    if let Err(err) = ctx.set_identity(identity, permissions) {
                        tracing::error!("identity rebind rejected: {err}");
                        return Response::json(
                            500,
                            json!({ "message": "Authentication state conflict" }),
                        );
                    }
                    tracing::debug!(%subject, "authenticated");
                }
                None => {
                    tracing::debug!("credential rejected");
                    return Response::json(
                        401,
                        json!({ "message": "Invalid or expired token" }),
                    );
                }
            }
        }
        next.run(request, ctx).await
    }
}

/// Sliding-window admission gate.
///
/// Rejections short-circuit with 429 and `Retry-After`; admitted calls get
/// the `X-RateLimit-*` headers describing the window they consumed.
pub struct RateLimit {
    limiter: SlidingWindowLimiter,
}

impl RateLimit {
    pub fn new(limiter: SlidingWindowLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Interceptor for RateLimit {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response {
        match self.limiter.check_and_record(&request.client_key()) {
            RateDecision::Rejected { retry_after, .. } => {
                let secs = retry_after.as_secs();
                Response::json(
                    429,
                    json!({
                        "message": "Rate limit exceeded. Please try again later.",
                        "retry_after": secs,
                    }),
                )
                .with_header(header::RETRY_AFTER, secs.to_string())
            }
            RateDecision::Allowed { limit, remaining, resets_at } => {
                let mut response = next.run(request, ctx).await;
                response.set_header(header::RATE_LIMIT_LIMIT, limit.to_string());
                response.set_header(header::RATE_LIMIT_REMAINING, remaining.to_string());
                response.set_header(header::RATE_LIMIT_RESET, resets_at.to_string());
                response
            }
        }
    }
}

/// Fail-fast gate in front of the handler.
///
/// Server-error responses count against the breaker; client errors are the
/// caller's fault and leave it untouched.
pub struct CircuitBreaking {
    breaker: CircuitBreaker,
}

impl CircuitBreaking {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl Interceptor for CircuitBreaking {
    async fn handle(
        &self,
        request: Request,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response {
        match self.breaker.before_call() {
            Admission::Rejected { retry_after } => {
                let secs = retry_after.as_secs();
                Response::json(
                    503,
                    json!({
                        "message": "Service temporarily unavailable. Circuit breaker is open.",
                        "retry_after": secs,
                    }),
                )
                .with_header(header::RETRY_AFTER, secs.to_string())
            }
            Admission::Allowed(pending) => {
                let response = next.run(request, ctx).await;
                pending.record_outcome(!response.is_server_error());
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::pipeline::{Handler, Pipeline};
    use std::time::Duration;

    struct Ok200;

    #[async_trait]
    impl Handler for Ok200 {
        async fn call(
            &self,
            _request: &Request,
            _ctx: &RequestContext,
        ) -> Result<Response, HandlerError> {
            Ok(Response::ok(json!({})))
        }
    }

    #[tokio::test]
    async fn security_headers_are_added_without_clobbering() {
        struct CspHandler;

        #[async_trait]
        impl Handler for CspHandler {
            async fn call(
                &self,
                _request: &Request,
                _ctx: &RequestContext,
            ) -> Result<Response, HandlerError> {
                Ok(Response::ok(json!({}))
                    .with_header("Content-Security-Policy", "default-src 'none'"))
            }
        }

        let pipeline =
            Pipeline::builder().handler(CspHandler).build().expect("valid pipeline");
        let response = pipeline.dispatch(Request::new("GET", "/v1/users")).await;

        assert_eq!(response.header("X-Content-Type-Options"), Some("nosniff"));
        assert_eq!(response.header("X-Frame-Options"), Some("DENY"));
        // A handler-set value wins over the default.
        assert_eq!(
            response.header("Content-Security-Policy"),
            Some("default-src 'none'")
        );
    }

    #[tokio::test]
    async fn rejected_calls_are_still_measured() {
        let metrics = MetricsCollector::new();
        let limiter = SlidingWindowLimiter::per_minute(1).expect("valid limiter");
        let pipeline = Pipeline::builder()
            .handler(Ok200)
            .metrics(metrics.clone())
            .rate_limiter(limiter)
            .build()
            .expect("valid pipeline");

        let request = || Request::new("GET", "/v1/users").with_peer_addr("10.0.0.1");
        assert_eq!(pipeline.dispatch(request()).await.status(), 200);
        let rejected = pipeline.dispatch(request()).await;
        assert_eq!(rejected.status(), 429);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["GET /v1/users"].count, 2);
        assert_eq!(snapshot["GET /v1/users"].error_count, 1);
    }

    #[tokio::test]
    async fn response_time_header_has_three_decimals() {
        let pipeline = Pipeline::builder().handler(Ok200).build().expect("valid pipeline");
        let response = pipeline.dispatch(Request::new("GET", "/v1/users")).await;

        let value = response.header(header::RESPONSE_TIME).expect("response time header");
        let (_, fraction) = value.split_once('.').expect("decimal point");
        assert_eq!(fraction.len(), 3);
        assert!(value.parse::<f64>().is_ok());
    }

    #[tokio::test]
    async fn quota_rejection_does_not_consume_a_probe_slot() {
        // Open the breaker, let the cooldown pass, then exhaust the quota:
        // the 429 must win and the probe slot must stay available.
        let limiter = SlidingWindowLimiter::per_minute(1).expect("valid limiter");
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10)).expect("valid breaker");
        let pipeline = Pipeline::builder()
            .handler(Ok200)
            .rate_limiter(limiter)
            .circuit_breaker(breaker.clone())
            .build()
            .expect("valid pipeline");

        match breaker.before_call() {
            Admission::Allowed(pending) => pending.record_outcome(false),
            Admission::Rejected { .. } => panic!("breaker starts closed"),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let request = || Request::new("GET", "/v1/users").with_peer_addr("10.0.0.1");
        assert_eq!(pipeline.dispatch(request()).await.status(), 200);
        let rejected = pipeline.dispatch(request()).await;
        assert_eq!(rejected.status(), 429);
    }
}
