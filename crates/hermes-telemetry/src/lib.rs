//! Observability for Hermes.
//!
//! - **Spans**: [`SpanManager`] owns every request span, from sampling to
//!   exactly-once termination
//! - **Tracing**: OpenTelemetry provider setup and W3C header carriers
//! - **Logging**: Structured JSON logging via `tracing-subscriber`
//! - **Metrics**: Request counters and histograms via the `metrics` facade
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::{init_telemetry, tracer_provider_builder, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("orders")
//!     .sampling_rate(0.5)
//!     .build();
//! let provider = tracer_provider_builder(&config)
//!     .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
//!     .build();
//!
//! let guard = init_telemetry(&config, Some(provider))?;
//! let tracer = guard.tracer();
//! let spans = config.span_manager();
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod span;
pub mod tracing;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{MetricsReporter, RequestMetrics};
pub use span::{SpanAttributes, SpanHandle, SpanManager, SpanManagerConfig};
pub use tracing::TracingConfig;

use opentelemetry::global::BoxedTracer;
use opentelemetry_sdk::trace::TracerProvider;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Guard that shuts down the tracer provider on drop.
///
/// Keep it alive for the lifetime of the application. On drop, pending
/// spans are flushed and the provider is shut down.
pub struct TelemetryGuard {
    tracer_provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(tracer_provider: Option<TracerProvider>) -> Self {
        Self { tracer_provider }
    }

    /// Returns a tracer from the guarded provider, if any.
    #[must_use]
    pub fn tracer(&self) -> Option<BoxedTracer> {
        self.tracer_provider
            .as_ref()
            .map(|_| opentelemetry::global::tracer(tracing::TRACER_NAME))
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    eprintln!("Error flushing tracer provider: {e}");
                }
            }
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {e}");
            }
        }
    }
}

/// Returns a tracer provider builder for `config`, ready for exporters.
#[must_use]
pub fn tracer_provider_builder(config: &TelemetryConfig) -> opentelemetry_sdk::trace::Builder {
    tracing::provider_builder(&config.tracing)
}

/// Initializes logging, metric descriptions and, if given, the tracer
/// provider.
///
/// # Errors
///
/// Returns `TelemetryError` if the configuration is invalid or logging
/// cannot be installed.
pub fn init_telemetry(
    config: &TelemetryConfig,
    provider: Option<TracerProvider>,
) -> TelemetryResult<TelemetryGuard> {
    config.validate()?;
    init_logging(&config.logging)?;
    metrics::describe_metrics();

    let provider = provider.filter(|_| config.tracing.enabled);
    if let Some(provider) = &provider {
        tracing::install(provider);
    }
    Ok(TelemetryGuard::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_guard_creation() {
        let guard = TelemetryGuard::new(None);
        assert!(guard.tracer().is_none());
        drop(guard);
    }

    #[test]
    fn test_init_rejects_invalid_ratio() {
        let mut config = TelemetryConfig::default();
        config.tracing.sample_ratio = -0.5;
        config.logging.enabled = false;
        assert!(matches!(
            init_telemetry(&config, None),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_init_rejects_invalid_span_limits() {
        let mut config = TelemetryConfig::builder().max_active_spans(0).build();
        config.logging.enabled = false;
        assert!(matches!(
            init_telemetry(&config, None),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_init_without_provider() {
        let mut config = TelemetryConfig::default();
        config.logging.enabled = false;
        let guard = init_telemetry(&config, None).unwrap();
        assert!(guard.tracer().is_none());
    }
}
