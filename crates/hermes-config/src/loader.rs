//! Layered configuration loader.
//!
//! Layers, later overriding earlier:
//! 1. Defaults
//! 2. A TOML or JSON file (or string)
//! 3. Variables from a `.env` file
//! 4. Process environment variables

use std::env;
use std::fs;
use std::path::Path;

use crate::{Compression, ConfigError, HermesConfig, LogFormat};

/// Configuration loader.
///
/// ```no_run
/// use hermes_config::ConfigLoader;
///
/// # fn main() -> Result<(), hermes_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("hermes.toml")?
///     .with_dotenv()?
///     .with_env_prefix("HERMES")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: HermesConfig,
    env_prefix: Option<String>,
    dotenv_vars: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new loader holding default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HermesConfig::default(),
            env_prefix: None,
            dotenv_vars: Vec::new(),
        }
    }

    /// Reset to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = HermesConfig::default();
        self
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = HermesConfig::development();
        self
    }

    /// Load configuration from a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, has an
    /// unsupported extension or fails to parse (unknown fields included).
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.config = Self::parse(&content, &extension)?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `format` ("toml" or "json").
    ///
    /// ```
    /// use hermes_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[trace]\ntimeout_ms = 500", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.trace.timeout_ms, 500);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = Self::parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Read variables from `.env` in the working directory, if present.
    ///
    /// The variables only feed prefixed overrides; the process environment
    /// is left untouched and wins over `.env` values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv_iter() {
            Ok(iter) => self.collect_dotenv(iter),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Read variables from a specific `.env`-style file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let iter = dotenvy::from_path_iter(path)?;
        self.collect_dotenv(iter)
    }

    /// Set the prefix for environment overrides.
    ///
    /// Variables use the form `PREFIX__SECTION__KEY`, for example
    /// `HERMES__TRACE__TIMEOUT_MS=5000`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Apply overrides, validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override fails to parse or validation fails.
    pub fn load(mut self) -> Result<HermesConfig, ConfigError> {
        self.apply_overrides()?;
        self.config.validate()?;
        Ok(self.config)
    }

    /// Apply overrides and return the configuration without validating.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override fails to parse.
    pub fn load_unvalidated(mut self) -> Result<HermesConfig, ConfigError> {
        self.apply_overrides()?;
        Ok(self.config)
    }

    fn parse(content: &str, format: &str) -> Result<HermesConfig, ConfigError> {
        match format {
            "toml" => Ok(toml::from_str(content)?),
            "json" => Ok(serde_json::from_str(content)?),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    fn collect_dotenv<I>(mut self, iter: I) -> Result<Self, ConfigError>
    where
        I: Iterator<Item = Result<(String, String), dotenvy::Error>>,
    {
        for item in iter {
            self.dotenv_vars.push(item?);
        }
        Ok(self)
    }

    fn apply_overrides(&mut self) -> Result<(), ConfigError> {
        let Some(prefix) = self.env_prefix.take() else {
            return Ok(());
        };

        let dotenv_vars = std::mem::take(&mut self.dotenv_vars);
        for (key, value) in dotenv_vars {
            if key.starts_with(&prefix) {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        for (key, value) in env::vars().filter(|(k, _)| k.starts_with(&prefix)) {
            self.apply_env_var(&key, &value, &prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let trace = &mut self.config.trace;
        let telemetry = &mut self.config.telemetry;

        match parts.as_slice() {
            ["TRACE", "TIMEOUT_MS"] => trace.timeout_ms = parse_num(key, value)?,
            ["TRACE", "ENCODING"] => trace.encoding = value.to_string(),
            ["TRACE", "REQUEST_ID_HEADER_NAME"] => {
                trace.request_id_header_name = value.to_string();
            }
            ["TRACE", "REQUEST_ID_NAME"] => trace.request_id_name = value.to_string(),
            ["TRACE", "ENABLE_TRACE"] => trace.enable_trace = parse_flag(key, value)?,
            ["TRACE", "SERVICE_NAME"] => trace.service_name = value.to_string(),
            ["TRACE", "SAMPLING_RATE"] => trace.sampling_rate = parse_num(key, value)?,
            ["TRACE", "SPAN_TIMEOUT_MS"] => trace.span_timeout_ms = parse_num(key, value)?,
            ["TRACE", "MAX_ACTIVE_SPANS"] => trace.max_active_spans = parse_num(key, value)?,
            ["TRACE", "COMPRESSION"] => {
                trace.compression = match value.to_lowercase().as_str() {
                    "none" => Compression::None,
                    "gzip" => Compression::Gzip,
                    "brotli" => Compression::Brotli,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'none', 'gzip' or 'brotli'",
                        ))
                    }
                };
            }
            ["TRACE", "COMPRESSION_MIN_SIZE"] => {
                trace.compression_min_size = parse_num(key, value)?;
            }
            ["TRACE", "DEBUG"] => trace.debug = parse_flag(key, value)?,

            ["TELEMETRY", "SERVICE_VERSION"] => {
                telemetry.service_version = (!value.is_empty()).then(|| value.to_string());
            }
            ["TELEMETRY", "ENVIRONMENT"] => telemetry.environment = value.to_string(),
            ["TELEMETRY", "TRACING", "ENABLED"] => {
                telemetry.tracing.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "TRACING", "SAMPLING_RATIO"] => {
                telemetry.tracing.sampling_ratio = parse_num(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                telemetry.logging.include_location = parse_flag(key, value)?;
            }

            // Unknown keys are ignored
            _ => {}
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected a number"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().with_defaults().load().unwrap();
        assert_eq!(config, HermesConfig::default());
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert!(config.trace.debug);
        assert_eq!(config.telemetry.logging.level, "debug");
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            [trace]
            timeout_ms = 2500
            request_id_header_name = "X-Correlation-Id"
            compression = "gzip"

            [telemetry.logging]
            format = "pretty"
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.trace.timeout(), Duration::from_millis(2500));
        assert_eq!(config.trace.request_id_header_name, "X-Correlation-Id");
        assert_eq!(config.trace.compression, Compression::Gzip);
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"trace": {"sampling_rate": 0.25, "enable_trace": true}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "JSON")
            .unwrap()
            .load()
            .unwrap();
        assert!(config.trace.enable_trace);
        assert!((config.trace.sampling_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_loader_unknown_format() {
        let result = ConfigLoader::new().with_string("", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(f)) if f == "yaml"));
    }

    #[test]
    fn test_loader_rejects_unknown_field() {
        let result = ConfigLoader::new().with_string("[trace]\ntimeout = 5", "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hermes.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[trace]\nservice_name = \"billing\"").unwrap();

        let config = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
        assert_eq!(config.trace.service_name, "billing");
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/hermes.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/hermes.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.trace.timeout_ms, 10_000);
    }

    #[test]
    fn test_loader_validation_fails() {
        let result = ConfigLoader::new()
            .with_string("[trace]\nmax_active_spans = 0", "toml")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_loader_load_unvalidated() {
        let config = ConfigLoader::new()
            .with_string("[trace]\nmax_active_spans = 0", "toml")
            .unwrap()
            .load_unvalidated()
            .unwrap();
        assert_eq!(config.trace.max_active_spans, 0);
    }

    #[test]
    fn test_dotenv_file_feeds_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "HERMESTEST__TRACE__TIMEOUT_MS=750").unwrap();
        writeln!(file, "HERMESTEST__TRACE__COMPRESSION=brotli").unwrap();
        writeln!(file, "UNRELATED=1").unwrap();

        let config = ConfigLoader::new()
            .with_dotenv_file(file.path())
            .unwrap()
            .with_env_prefix("hermestest")
            .load()
            .unwrap();
        assert_eq!(config.trace.timeout_ms, 750);
        assert_eq!(config.trace.compression, Compression::Brotli);
    }

    // Process environment overrides go through the same `apply_env_var`
    // path; mutating the process environment is avoided in tests.

    #[test]
    fn test_apply_env_var_trace() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("T__TRACE__REQUEST_ID_HEADER_NAME", "X-Trace", "T")
            .unwrap();
        loader.apply_env_var("T__TRACE__SPAN_TIMEOUT_MS", "0", "T").unwrap();
        loader.apply_env_var("T__TRACE__DEBUG", "yes", "T").unwrap();
        assert_eq!(loader.config.trace.request_id_header_name, "X-Trace");
        assert_eq!(loader.config.trace.span_timeout(), None);
        assert!(loader.config.trace.debug);
    }

    #[test]
    fn test_apply_env_var_telemetry() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("T__TELEMETRY__SERVICE_VERSION", "3.1.0", "T")
            .unwrap();
        loader
            .apply_env_var("T__TELEMETRY__LOGGING__FORMAT", "pretty", "T")
            .unwrap();
        assert_eq!(
            loader.config.telemetry.service_version.as_deref(),
            Some("3.1.0")
        );
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_apply_env_var_invalid_number() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("T__TRACE__TIMEOUT_MS", "soon", "T");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_apply_env_var_invalid_compression() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("T__TRACE__COMPRESSION", "zstd", "T")
            .is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
