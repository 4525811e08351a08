//! Top-level configuration.
//!
//! [`HermesConfig`] groups the trace middleware options with the telemetry
//! section used to initialise logging and the tracer provider.

use hermes_telemetry::{LogConfig, TelemetryConfig, TracingConfig};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, TraceOptions};

/// Complete Hermes configuration.
///
/// ```
/// use hermes_config::HermesConfig;
///
/// let config = HermesConfig::default();
/// assert_eq!(config.trace.service_name, "unknown_service");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HermesConfig {
    /// Trace middleware options.
    #[serde(default)]
    pub trace: TraceOptions,

    /// Logging and tracer provider settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl HermesConfig {
    /// Development preset: pretty debug logging and lifecycle debug output.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.trace.debug = true;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trace.validate()?;
        if !(0.0..=1.0).contains(&self.telemetry.tracing.sampling_ratio) {
            return Err(ConfigError::invalid_value(
                "telemetry.tracing.sampling_ratio",
                format!(
                    "must be within [0, 1], got {}",
                    self.telemetry.tracing.sampling_ratio
                ),
            ));
        }
        Ok(())
    }

    /// Builds the telemetry configuration.
    ///
    /// The service name and span settings come from the trace options, so
    /// telemetry and the trace middleware agree.
    #[must_use]
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        let section = &self.telemetry;
        let mut builder = TelemetryConfig::builder()
            .tracing(TracingConfig {
                enabled: section.tracing.enabled && self.trace.enable_trace,
                sample_ratio: section.tracing.sampling_ratio,
                ..TracingConfig::default()
            })
            .service_name(&self.trace.service_name)
            .environment(&section.environment)
            .spans(self.trace.span_manager_config())
            .logging(LogConfig {
                enabled: section.logging.enabled,
                level: section.logging.level.clone(),
                json_format: section.logging.format == LogFormat::Json,
                span_events: false,
                file_line_info: section.logging.include_location,
                include_target: true,
            });
        if let Some(version) = &section.service_version {
            builder = builder.service_version(version);
        }
        builder.build()
    }
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service version reported in span resources.
    #[serde(default)]
    pub service_version: Option<String>,

    /// Deployment environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Tracer provider settings.
    #[serde(default)]
    pub tracing: TracingSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_version: None,
            environment: default_environment(),
            tracing: TracingSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

/// Tracer provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TracingSection {
    /// Install the tracer provider.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SDK sampling ratio (0.0 to 1.0).
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log filter directive (e.g. "info" or "hermes_middleware=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            include_location: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}
