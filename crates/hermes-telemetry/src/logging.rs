//! Structured logging for Hermes.
//!
//! Installs a `tracing-subscriber` registry with JSON (production) or
//! pretty (development) output, and provides the request completion macro
//! every protocol handler logs through.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::default())?;
//! tracing::info!(request_id = "abc", "Processing request");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Log filter (e.g., "info", "hermes_middleware=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (enter, exit, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            include_target: true,
        }
    }
}

/// Initializes the global subscriber.
///
/// Calling this more than once is an error from the second call on; the
/// first subscriber stays installed.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Logs the completion line of a request.
///
/// Emitted at ERROR level when `status >= 400`, INFO otherwise.
///
/// ```rust,ignore
/// log_request_complete!(
///     action = "GET",
///     status = 200,
///     start_time = 1_700_000_000_000_u64,
///     duration_ms = 12_u64,
///     request_id = "abc",
///     path = "/users",
/// );
/// ```
#[macro_export]
macro_rules! log_request_complete {
    (
        action = $action:expr,
        status = $status:expr,
        start_time = $start:expr,
        duration_ms = $duration:expr,
        request_id = $request_id:expr,
        path = $path:expr $(,)?
    ) => {{
        let status: u16 = $status;
        if status >= 400 {
            ::tracing::error!(
                action = %$action,
                status,
                start_time = $start,
                duration_ms = $duration,
                request_id = %$request_id,
                path = %$path,
                "request completed"
            );
        } else {
            ::tracing::info!(
                action = %$action,
                status,
                start_time = $start,
                duration_ms = $duration,
                request_id = %$request_id,
                path = %$path,
                "request completed"
            );
        }
    }};
}
