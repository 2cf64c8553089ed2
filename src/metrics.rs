//! Per-route call metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
struct RouteStats {
    count: u64,
    error_count: u64,
    total_duration: Duration,
}

/// Aggregated view of one route at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSnapshot {
    pub count: u64,
    pub error_count: u64,
    /// Mean over all durations recorded for the route, in seconds.
    pub mean_duration_secs: f64,
}

/// Aggregates per-route call counts, error counts, and latency.
///
/// Purely observational: nothing here feeds back into admission decisions.
/// Clones share the same store via `Arc`. Durations are folded into a
/// running sum as they arrive, which keeps memory bounded under sustained
/// load while still yielding the exact mean.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    routes: Arc<Mutex<HashMap<String, RouteStats>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call against a route key (e.g. `"GET /v1/accounts"`).
    pub fn record(&self, route_key: &str, duration: Duration, is_error: bool) {
        let mut routes = self.routes.lock().unwrap();
        let stats = routes.entry(route_key.to_string()).or_default();
        stats.count += 1;
        if is_error {
            stats.error_count += 1;
        }
        stats.total_duration += duration;
    }

    /// Read-only aggregate view across all routes.
    ///
    /// Values are eventually-consistent approximations; there is no
    /// point-in-time consistency guarantee across different route keys.
    pub fn snapshot(&self) -> HashMap<String, RouteSnapshot> {
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .map(|(route, stats)| {
                let mean = if stats.count == 0 {
                    0.0
                } else {
                    stats.total_duration.as_secs_f64() / stats.count as f64
                };
                (
                    route.clone(),
                    RouteSnapshot {
                        count: stats.count,
                        error_count: stats.error_count,
                        mean_duration_secs: mean,
                    },
                )
            })
            .collect()
    }
}
