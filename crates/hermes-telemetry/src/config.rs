//! Telemetry configuration.
//!
//! One value drives the whole observability stack of a Hermes service:
//! the tracer provider, the log subscriber and the request span manager.
//! Service identity is held once, in the tracing section, and read back
//! through [`TelemetryConfig::service_name`].
//!
//! ```
//! use std::time::Duration;
//! use hermes_telemetry::TelemetryConfig;
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("orders")
//!     .sampling_rate(0.25)
//!     .span_timeout(Some(Duration::from_secs(5)))
//!     .build();
//!
//! assert_eq!(config.service_name(), "orders");
//! assert_eq!(config.spans.max_active_spans, 10_000);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::error::TelemetryError;
use crate::logging::LogConfig;
use crate::span::{SpanManager, SpanManagerConfig};
use crate::tracing::TracingConfig;
use crate::TelemetryResult;

/// Provider, logging and request span settings.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Tracer provider settings, including the service identity.
    pub tracing: TracingConfig,

    /// Log subscriber settings.
    pub logging: LogConfig,

    /// Per-request span sampling, safety timeout and capacity.
    pub spans: SpanManagerConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    /// Returns the service name spans and logs are reported under.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.tracing.service_name
    }

    /// Checks the sampling ratios and span limits.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> TelemetryResult<()> {
        self.tracing.validate()?;
        if !(0.0..=1.0).contains(&self.spans.sampling_rate) {
            return Err(TelemetryError::InvalidConfig(format!(
                "spans.sampling_rate must be within [0, 1], got {}",
                self.spans.sampling_rate
            )));
        }
        if self.spans.max_active_spans == 0 {
            return Err(TelemetryError::InvalidConfig(
                "spans.max_active_spans must be at least 1".to_string(),
            ));
        }
        if self.spans.span_timeout == Some(Duration::ZERO) {
            return Err(TelemetryError::InvalidConfig(
                "spans.span_timeout must be positive; use None to disable it".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates a span manager with these span settings.
    #[must_use]
    pub fn span_manager(&self) -> SpanManager {
        SpanManager::new(self.spans.clone())
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.config.tracing.service_name = name.to_string();
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn service_version(mut self, version: &str) -> Self {
        self.config.tracing.service_version = version.to_string();
        self
    }

    /// Sets the deployment environment.
    #[must_use]
    pub fn environment(mut self, env: &str) -> Self {
        self.config.tracing.environment = env.to_string();
        self
    }

    /// Replaces the tracing section, identity included.
    ///
    /// Call it before the identity setters so they apply on top.
    #[must_use]
    pub fn tracing(mut self, config: TracingConfig) -> Self {
        self.config.tracing = config;
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.config.logging = config;
        self
    }

    /// Replaces all span manager settings.
    #[must_use]
    pub fn spans(mut self, config: SpanManagerConfig) -> Self {
        self.config.spans = config;
        self
    }

    /// Sets the probability that a request gets a span.
    #[must_use]
    pub fn sampling_rate(mut self, rate: f64) -> Self {
        self.config.spans.sampling_rate = rate;
        self
    }

    /// Sets the safety timeout for unfinished spans. `None` disables it.
    #[must_use]
    pub fn span_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.spans.span_timeout = timeout;
        self
    }

    /// Sets the cap on concurrently tracked spans.
    #[must_use]
    pub fn max_active_spans(mut self, max: usize) -> Self {
        self.config.spans.max_active_spans = max;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        self.config
    }
}
