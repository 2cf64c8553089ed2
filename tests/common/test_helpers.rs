use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bouncer::{
    Authenticator, Clock, Handler, HandlerError, Identity, Request, RequestContext, Response,
};
use serde_json::json;

/// Wall clock that only moves when the test says so.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Arc::new(AtomicU64::new(1_000_000)) }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(secs * 1000);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Authenticator backed by a fixed token table.
#[derive(Debug, Default)]
pub struct TableAuthenticator {
    users: HashMap<String, (Identity, HashSet<String>)>,
}

impl TableAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, subject: &str, permissions: &[&str]) -> Self {
        let identity = Identity::new(subject, token);
        let permissions = permissions.iter().map(|p| p.to_string()).collect();
        self.users.insert(token.to_string(), (identity, permissions));
        self
    }
}

#[async_trait::async_trait]
impl Authenticator for TableAuthenticator {
    async fn validate(&self, credential: &str) -> Option<Identity> {
        self.users.get(credential).map(|(identity, _)| identity.clone())
    }

    async fn permissions_for(&self, credential: &str) -> HashSet<String> {
        self.users
            .get(credential)
            .map(|(_, permissions)| permissions.clone())
            .unwrap_or_default()
    }
}

/// Handler that replays a scripted status sequence and counts invocations.
///
/// Statuses >= 400 are returned as `HandlerError`s so the pipeline's
/// boundary classification is exercised; anything else becomes a JSON
/// response with that status.
pub struct ScriptedHandler {
    script: Mutex<VecDeque<u16>>,
    fallback: u16,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    pub fn always(status: u16) -> Self {
        Self::sequence(&[], status)
    }

    pub fn sequence(statuses: &[u16], fallback: u16) -> Self {
        Self {
            script: Mutex::new(statuses.iter().copied().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Handler for ScriptedHandler {
    async fn call(
        &self,
        _request: &Request,
        _ctx: &RequestContext,
    ) -> Result<Response, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if status >= 400 {
            Err(HandlerError::new(status, "induced failure"))
        } else {
            Ok(Response::json(status, json!({ "ok": true })))
        }
    }
}
