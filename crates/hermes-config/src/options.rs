//! Per-middleware trace options.

use std::time::Duration;

use hermes_telemetry::SpanManagerConfig;
use http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Response body compression algorithm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Never compress.
    #[default]
    None,
    /// gzip, when the client accepts it.
    Gzip,
    /// Brotli, when the client accepts it.
    Brotli,
}

impl Compression {
    /// Returns the `Content-Encoding` token, if any.
    #[must_use]
    pub const fn encoding(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
            Self::Brotli => Some("br"),
        }
    }
}

/// Options for the trace middleware.
///
/// ```
/// use hermes_config::TraceOptions;
///
/// let options = TraceOptions::default();
/// assert_eq!(options.timeout_ms, 10_000);
/// assert_eq!(options.request_id_header_name, "X-Request-Id");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TraceOptions {
    /// Deadline for downstream processing, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Response charset applied to `Content-Type`.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Header the request id is read from and echoed to.
    #[serde(default = "default_request_id_header_name")]
    pub request_id_header_name: String,

    /// Query parameter, gRPC metadata key and message field for the request id.
    #[serde(default = "default_request_id_name")]
    pub request_id_name: String,

    /// Whether spans are created at all.
    #[serde(default)]
    pub enable_trace: bool,

    /// Span name.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Probability that a request gets a span.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,

    /// Safety force-end for orphaned spans, in milliseconds. 0 disables.
    #[serde(default = "default_span_timeout_ms")]
    pub span_timeout_ms: u64,

    /// Bound on the active span table.
    #[serde(default = "default_max_active_spans")]
    pub max_active_spans: usize,

    /// HTTP response compression.
    #[serde(default)]
    pub compression: Compression,

    /// Smallest body, in bytes, that gets compressed.
    #[serde(default = "default_compression_min_size")]
    pub compression_min_size: usize,

    /// Adds debug logging around the lifecycle.
    #[serde(default)]
    pub debug: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            encoding: default_encoding(),
            request_id_header_name: default_request_id_header_name(),
            request_id_name: default_request_id_name(),
            enable_trace: false,
            service_name: default_service_name(),
            sampling_rate: default_sampling_rate(),
            span_timeout_ms: default_span_timeout_ms(),
            max_active_spans: default_max_active_spans(),
            compression: Compression::None,
            compression_min_size: default_compression_min_size(),
            debug: false,
        }
    }
}

impl TraceOptions {
    /// Validate the options.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `sampling_rate` is outside `[0, 1]`
    /// - `timeout_ms` is zero
    /// - `max_active_spans` is zero
    /// - the request id header name is not a valid HTTP header name
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(ConfigError::invalid_value(
                "trace.sampling_rate",
                format!("must be within [0, 1], got {}", self.sampling_rate),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "trace.timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.max_active_spans == 0 {
            return Err(ConfigError::invalid_value(
                "trace.max_active_spans",
                "must be at least 1",
            ));
        }
        if HeaderName::from_bytes(self.request_id_header_name.as_bytes()).is_err() {
            return Err(ConfigError::invalid_value(
                "trace.request_id_header_name",
                format!("not a valid header name: {:?}", self.request_id_header_name),
            ));
        }
        if self.request_id_name.is_empty() {
            return Err(ConfigError::invalid_value(
                "trace.request_id_name",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Downstream deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Span safety timeout, `None` when disabled.
    #[must_use]
    pub const fn span_timeout(&self) -> Option<Duration> {
        if self.span_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.span_timeout_ms))
        }
    }

    /// Span manager settings carried by these options.
    #[must_use]
    pub const fn span_manager_config(&self) -> SpanManagerConfig {
        SpanManagerConfig {
            sampling_rate: self.sampling_rate,
            span_timeout: self.span_timeout(),
            max_active_spans: self.max_active_spans,
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_request_id_header_name() -> String {
    "X-Request-Id".to_string()
}

fn default_request_id_name() -> String {
    "requestId".to_string()
}

fn default_service_name() -> String {
    "unknown_service".to_string()
}

fn default_sampling_rate() -> f64 {
    1.0
}

fn default_span_timeout_ms() -> u64 {
    30_000
}

fn default_max_active_spans() -> usize {
    10_000
}

fn default_compression_min_size() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_manager_config() {
        let options = TraceOptions {
            sampling_rate: 0.2,
            span_timeout_ms: 0,
            max_active_spans: 16,
            ..TraceOptions::default()
        };
        let spans = options.span_manager_config();
        assert!((spans.sampling_rate - 0.2).abs() < f64::EPSILON);
        assert_eq!(spans.span_timeout, None);
        assert_eq!(spans.max_active_spans, 16);
    }

    #[test]
    fn test_defaults() {
        let options = TraceOptions::default();
        assert_eq!(options.timeout(), Duration::from_secs(10));
        assert_eq!(options.encoding, "utf-8");
        assert_eq!(options.request_id_name, "requestId");
        assert!(!options.enable_trace);
        assert_eq!(options.span_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(options.max_active_spans, 10_000);
        assert_eq!(options.compression, Compression::None);
        assert_eq!(options.compression_min_size, 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_span_timeout_disables() {
        let options = TraceOptions {
            span_timeout_ms: 0,
            ..TraceOptions::default()
        };
        assert_eq!(options.span_timeout(), None);
    }

    #[test]
    fn test_invalid_sampling_rate() {
        let options = TraceOptions {
            sampling_rate: 1.2,
            ..TraceOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "trace.sampling_rate"
        ));
    }

    #[test]
    fn test_invalid_header_name() {
        let options = TraceOptions {
            request_id_header_name: "bad header".to_string(),
            ..TraceOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let options = TraceOptions {
            timeout_ms: 0,
            ..TraceOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_compression_tokens() {
        assert_eq!(Compression::None.encoding(), None);
        assert_eq!(Compression::Gzip.encoding(), Some("gzip"));
        assert_eq!(Compression::Brotli.encoding(), Some("br"));
    }

    #[test]
    fn test_deserialize_unknown_field_rejected() {
        let result: Result<TraceOptions, _> = serde_json::from_str(r#"{"timeout": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let options: TraceOptions =
            serde_json::from_str(r#"{"timeout_ms": 250, "compression": "brotli"}"#).unwrap();
        assert_eq!(options.timeout_ms, 250);
        assert_eq!(options.compression, Compression::Brotli);
        assert_eq!(options.encoding, "utf-8");
    }
}
