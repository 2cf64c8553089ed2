//! Probes the context-isolation invariant: two requests executing
//! concurrently inside one process must never observe each other's
//! identity, at any checkpoint, across any suspension point.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bouncer::{
    header, Handler, HandlerError, Identity, Pipeline, Request, RequestContext, Response,
};
use common::test_helpers::TableAuthenticator;
use serde_json::json;

/// Asserts at several checkpoints that the context still holds the identity
/// this request authenticated as, while other requests run interleaved.
struct IsolationProbe;

#[async_trait::async_trait]
impl Handler for IsolationProbe {
    async fn call(
        &self,
        request: &Request,
        ctx: &RequestContext,
    ) -> Result<Response, HandlerError> {
        let expected = request
            .header("x-expected-subject")
            .ok_or_else(|| HandlerError::bad_request("missing expectation"))?
            .to_string();
        let sleep_millis: u64 = request
            .header("x-sleep-millis")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(1);

        let observed = |ctx: &RequestContext| {
            ctx.identity().map(Identity::subject).unwrap_or("<anonymous>").to_string()
        };

        // Checkpoint 1: immediately after authentication.
        assert_eq!(observed(ctx), expected);

        // Checkpoint 2: after yielding the worker to other tasks.
        tokio::task::yield_now().await;
        assert_eq!(observed(ctx), expected);

        // Checkpoint 3: after a real suspension while other requests run.
        tokio::time::sleep(Duration::from_millis(sleep_millis)).await;
        assert_eq!(observed(ctx), expected);

        Ok(Response::ok(json!({
            "subject": observed(ctx),
            "correlation_id": ctx.correlation_id(),
        })))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_observe_each_others_identity() {
    const REQUESTS: usize = 16;

    let mut authenticator = TableAuthenticator::new();
    for i in 0..REQUESTS {
        authenticator =
            authenticator.with_user(&format!("tok-{i}"), &format!("subject-{i}"), &[]);
    }

    let pipeline = Arc::new(
        Pipeline::builder()
            .handler(IsolationProbe)
            .authenticator(authenticator)
            .build()
            .expect("valid pipeline"),
    );

    let handles: Vec<_> = (0..REQUESTS)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let request = Request::new("GET", "/v1/whoami")
                    .with_peer_addr(format!("10.0.0.{i}"))
                    .with_header(header::AUTHORIZATION, format!("Bearer tok-{i}"))
                    .with_header("x-expected-subject", format!("subject-{i}"))
                    .with_header("x-sleep-millis", format!("{}", i % 7 + 1));
                (i, pipeline.dispatch(request).await)
            })
        })
        .collect();

    let mut correlation_ids = HashSet::new();
    for handle in handles {
        let (i, response) = handle.await.expect("request task panicked");
        assert_eq!(response.status(), 200, "request {i} failed");
        assert_eq!(response.body()["subject"], format!("subject-{i}"));

        let correlation_id = response.body()["correlation_id"]
            .as_str()
            .expect("correlation id")
            .to_string();
        assert_eq!(
            response.header(header::REQUEST_ID),
            Some(correlation_id.as_str()),
            "handler and response must agree on the correlation id"
        );
        assert!(
            correlation_ids.insert(correlation_id),
            "correlation ids must be unique per request"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn owned_contexts_stay_stable_across_interleaved_mutation() {
    const TASKS: usize = 32;

    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            tokio::spawn(async move {
                let mut ctx = RequestContext::new();
                let subject = format!("task-{i}");
                ctx.set_identity(
                    Identity::new(subject.clone(), format!("cred-{i}")),
                    [format!("perm-{i}")].into_iter().collect(),
                )
                .expect("first bind succeeds");

                for _ in 0..10 {
                    tokio::task::yield_now().await;
                    assert_eq!(ctx.identity().map(Identity::subject), Some(subject.as_str()));
                    assert!(ctx.has_permission(&format!("perm-{i}")));
                }
                ctx.correlation_id().to_string()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let correlation_id = handle.await.expect("task panicked");
        assert!(seen.insert(correlation_id));
    }
}
