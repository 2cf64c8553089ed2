//! Transport-neutral request/response surface.
//!
//! The pipeline is specified against header and status semantics rather
//! than a particular HTTP stack. These types carry just enough of a request
//! for the admission gates (client identity, credential, route) and of a
//! response (status, headers, JSON body) to honor that contract; embedders
//! map them onto their server framework at the edge.

use std::collections::HashMap;

use serde_json::Value;

/// Header names read and written by the pipeline.
pub mod header {
    pub const REQUEST_ID: &str = "X-Request-ID";
    pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
    pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
    pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
    pub const RESPONSE_TIME: &str = "X-Response-Time";
    pub const RETRY_AFTER: &str = "Retry-After";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const FORWARDED_FOR: &str = "X-Forwarded-For";
    pub const REAL_IP: &str = "X-Real-IP";
}

/// One inbound request as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    route: Option<String>,
    headers: HashMap<String, String>,
    peer_addr: Option<String>,
    body: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            route: None,
            headers: HashMap::new(),
            peer_addr: None,
            body: None,
        }
    }

    /// Matched path template (e.g. `/v1/accounts/{id}`) used for metrics
    /// keying; falls back to the concrete path when absent.
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_peer_addr(mut self, peer_addr: impl Into<String>) -> Self {
        self.peer_addr = Some(peer_addr.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Route identity used for metrics: method plus path template.
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.route.as_deref().unwrap_or(&self.path))
    }

    /// Client identity used for rate limiting: first `X-Forwarded-For` hop,
    /// then `X-Real-IP`, then the peer address.
    pub fn client_key(&self) -> String {
        if let Some(forwarded) = self.header(header::FORWARDED_FOR) {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
        if let Some(real_ip) = self.header(header::REAL_IP) {
            return real_ip.to_string();
        }
        self.peer_addr.clone().unwrap_or_else(|| "unknown".to_string())
    }

    /// Bearer credential from the `Authorization` header, if present.
    pub fn bearer_credential(&self) -> Option<&str> {
        self.header(header::AUTHORIZATION)?.strip_prefix("Bearer ")
    }
}

/// One outbound response as the pipeline builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: Value,
}

impl Response {
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, headers: HashMap::new(), body }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|stored, _| !stored.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Whether the response counts toward the route's error counter.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}
