//! Typed configuration for Hermes.
//!
//! - [`TraceOptions`]: the trace middleware options (deadline, request id
//!   location, sampling, span bounds, compression)
//! - [`HermesConfig`]: trace options plus the telemetry section
//! - [`ConfigLoader`]: defaults → file → `.env` → environment, then
//!   strict validation
//!
//! # Configuration File Format
//!
//! ```toml
//! [trace]
//! timeout_ms = 10000
//! encoding = "utf-8"
//! request_id_header_name = "X-Request-Id"
//! request_id_name = "requestId"
//! enable_trace = true
//! service_name = "orders"
//! sampling_rate = 1.0
//! span_timeout_ms = 30000
//! max_active_spans = 10000
//! compression = "gzip"
//! compression_min_size = 1024
//!
//! [telemetry]
//! service_version = "1.0.0"
//! environment = "production"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `HERMES__TRACE__TIMEOUT_MS=5000`
//! - `HERMES__TRACE__COMPRESSION=brotli`
//! - `HERMES__TELEMETRY__LOGGING__LEVEL=debug`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod options;

pub use config::{HermesConfig, LogFormat, LoggingSection, TelemetrySection, TracingSection};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use options::{Compression, TraceOptions};
