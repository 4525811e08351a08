//! OpenTelemetry tracer setup and W3C header carriers.
//!
//! Exporters are attached by the application: [`provider_builder`] returns
//! an SDK builder already carrying the service resource, sampler and id
//! generator, and [`install`] registers the finished provider globally and
//! hands back the tracer the trace middleware starts spans with.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::tracing::{install, provider_builder, TracingConfig};
//!
//! let provider = provider_builder(&TracingConfig::default())
//!     .with_simple_exporter(my_exporter)
//!     .build();
//! let tracer = install(&provider);
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Builder, RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

/// Tracer name used for every span Hermes starts.
pub const TRACER_NAME: &str = "hermes";

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether tracing is enabled.
    pub enabled: bool,

    /// Service name for spans.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// SDK-level sampling ratio (0.0 to 1.0).
    ///
    /// Applied on top of the span manager's own per-request sampling.
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "unknown_service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_ratio: 1.0,
        }
    }
}

impl TracingConfig {
    /// Checks that the sampling ratio is within `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidConfig` for an out-of-range ratio.
    pub fn validate(&self) -> TelemetryResult<()> {
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(TelemetryError::InvalidConfig(format!(
                "sample_ratio must be within [0, 1], got {}",
                self.sample_ratio
            )));
        }
        Ok(())
    }

    fn sampler(&self) -> Sampler {
        if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_ratio <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_ratio)
        }
    }

    fn resource(&self) -> Resource {
        Resource::new([
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("deployment.environment", self.environment.clone()),
            KeyValue::new("process.pid", i64::from(std::process::id())),
        ])
    }
}

/// Returns a tracer provider builder carrying resource, sampler and id
/// generator. Add exporters before calling `build`.
#[must_use]
pub fn provider_builder(config: &TracingConfig) -> Builder {
    TracerProvider::builder()
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(config.resource())
}

/// Registers `provider` and the W3C propagator globally.
///
/// Returns the tracer to hand to the trace middleware.
pub fn install(provider: &TracerProvider) -> BoxedTracer {
    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());
    global::tracer(TRACER_NAME)
}

/// HTTP header extractor for `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl opentelemetry::propagation::Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// HTTP header injector for `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::propagation::{Extractor, Injector};

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.sample_ratio, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_ratio() {
        let config = TracingConfig {
            sample_ratio: 1.5,
            ..TracingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sampler_selection() {
        let mut config = TracingConfig::default();
        assert!(matches!(config.sampler(), Sampler::AlwaysOn));
        config.sample_ratio = 0.0;
        assert!(matches!(config.sampler(), Sampler::AlwaysOff));
        config.sample_ratio = 0.25;
        assert!(matches!(config.sampler(), Sampler::TraceIdRatioBased(r) if r == 0.25));
    }

    #[test]
    fn test_header_extractor() {
        let mut headers = http::HeaderMap::new();
        headers.insert("traceparent", "test-value".parse().unwrap());

        let extractor = HeaderExtractor(&headers);
        assert_eq!(extractor.get("traceparent"), Some("test-value"));
        assert!(extractor.get("nonexistent").is_none());
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }

    #[test]
    fn test_header_injector_skips_invalid_values() {
        let mut headers = http::HeaderMap::new();
        {
            let mut injector = HeaderInjector(&mut headers);
            injector.set("traceparent", "injected-value".to_string());
            injector.set("tracestate", "bad\nvalue".to_string());
        }
        assert_eq!(headers["traceparent"], "injected-value");
        assert!(headers.get("tracestate").is_none());
    }
}
