//! Request metrics for Hermes.
//!
//! Metrics are emitted through the `metrics` facade; installing a recorder
//! (and exposing it for scraping) is left to the application.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hermes_requests_total` | Counter | `protocol`, `status` | Total requests |
//! | `hermes_request_duration_seconds` | Histogram | `protocol` | Request latency |
//!
//! In addition, a [`MetricsReporter`] callback can be registered on the trace
//! middleware to receive a [`RequestMetrics`] record per request.

use hermes_core::Protocol;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use opentelemetry::KeyValue;
use std::sync::{Arc, Once};
use std::time::Duration;

/// Counter of completed requests.
pub const REQUESTS_TOTAL: &str = "hermes_requests_total";

/// Histogram of request durations in seconds.
pub const REQUEST_DURATION_SECONDS: &str = "hermes_request_duration_seconds";

static DESCRIBE: Once = Once::new();

/// One completed request, as handed to a [`MetricsReporter`].
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Time from request start to completion.
    pub duration: Duration,
    /// Final transport status.
    pub status: u16,
    /// Request path.
    pub path: String,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Span-style attributes describing the request.
    pub attributes: Vec<KeyValue>,
}

/// Callback receiving one [`RequestMetrics`] per completed request.
pub type MetricsReporter = Arc<dyn Fn(&RequestMetrics) + Send + Sync>;

/// Registers descriptions for the standard metrics. Idempotent.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(REQUESTS_TOTAL, Unit::Count, "Total number of requests");
        describe_histogram!(
            REQUEST_DURATION_SECONDS,
            Unit::Seconds,
            "Request duration in seconds"
        );
    });
}

/// Records one completed request.
pub fn record_request(metrics: &RequestMetrics) {
    let protocol = metrics.protocol.as_str();
    counter!(
        REQUESTS_TOTAL,
        "protocol" => protocol,
        "status" => metrics.status.to_string()
    )
    .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "protocol" => protocol)
        .record(metrics.duration.as_secs_f64());
}
