#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Bouncer
//!
//! Admission control and resilience pipeline for async Rust request
//! handlers: request-scoped identity context, sliding-window rate limiting,
//! circuit breaking, and per-route metrics, composed as an ordered
//! interceptor chain in front of your business logic.
//!
//! ## Features
//!
//! - **Request context** owned by exactly one in-flight request, so
//!   identity can never leak between concurrently executing requests
//! - **Sliding-window rate limiting** per client key, with atomic
//!   check-and-record and `X-RateLimit-*` response metadata
//! - **Circuit breaker** with lazy half-open recovery and drop-guard
//!   outcome accounting (an abandoned call counts as a failure)
//! - **Per-route metrics** with a serializable snapshot for exporters
//! - **Interceptor chain** with a uniform `(request, ctx, next)` signature,
//!   composed once at startup
//!
//! ## Quick Start
//!
//! ```rust
//! use bouncer::{Handler, HandlerError, Pipeline, Request, RequestContext, Response};
//! use serde_json::json;
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl Handler for Hello {
//!     async fn call(
//!         &self,
//!         _request: &Request,
//!         _ctx: &RequestContext,
//!     ) -> Result<Response, HandlerError> {
//!         Ok(Response::ok(json!({ "hello": "world" })))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::builder().handler(Hello).build()?;
//!     let response = pipeline.dispatch(Request::new("GET", "/v1/hello")).await;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;

// Re-exports
pub use auth::{Authenticator, Identity};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    OutcomePending,
};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, PipelineConfig};
pub use context::{ContextError, RequestContext};
pub use error::HandlerError;
pub use http::{header, Request, Response};
pub use metrics::{MetricsCollector, RouteSnapshot};
pub use pipeline::{Handler, Interceptor, Next, Pipeline, PipelineBuilder};
pub use rate_limit::{RateDecision, SlidingWindowLimiter};
