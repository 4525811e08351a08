//! Per-request options threaded through the protocol handlers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hermes_config::{Compression, TraceOptions};
use hermes_core::{ErrorHandler, SpanRef};
use hermes_telemetry::{SpanHandle, SpanManager};

/// Options assembled once per request by the trace middleware.
///
/// Immutable for the duration of the request. The span, when present, is
/// only ever touched through `span_manager`.
#[derive(Clone)]
pub struct ExtensionOptions {
    /// Deadline for downstream processing.
    pub timeout: Duration,
    /// Response charset.
    pub encoding: String,
    /// Skip downstream processing (server draining).
    pub terminated: bool,
    /// The request span, if one was sampled.
    pub span: Option<SpanHandle>,
    /// Owner of `span`.
    pub span_manager: Option<Arc<SpanManager>>,
    /// Renderer for errors that are not domain exceptions.
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
    /// HTTP response compression.
    pub compression: Compression,
    /// Smallest body that gets compressed.
    pub compression_min_size: usize,
    /// Extra lifecycle debug logging.
    pub debug: bool,
}

impl ExtensionOptions {
    /// Builds options from the trace configuration, with no span.
    #[must_use]
    pub fn from_options(options: &TraceOptions) -> Self {
        Self {
            timeout: options.timeout(),
            encoding: options.encoding.clone(),
            terminated: false,
            span: None,
            span_manager: None,
            error_handler: None,
            compression: options.compression,
            compression_min_size: options.compression_min_size,
            debug: options.debug,
        }
    }

    /// Returns the span identifiers, if a span is attached.
    #[must_use]
    pub fn span_ref(&self) -> Option<SpanRef> {
        self.span.as_ref().map(|span| span.span_ref().clone())
    }

    /// Runs `f` with the span and its manager, if both are present.
    pub(crate) fn with_span(&self, f: impl FnOnce(&SpanManager, &SpanHandle)) {
        if let (Some(manager), Some(span)) = (&self.span_manager, &self.span) {
            f(manager, span);
        }
    }
}

impl Default for ExtensionOptions {
    fn default() -> Self {
        Self::from_options(&TraceOptions::default())
    }
}

impl fmt::Debug for ExtensionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionOptions")
            .field("timeout", &self.timeout)
            .field("encoding", &self.encoding)
            .field("terminated", &self.terminated)
            .field("span", &self.span)
            .field("error_handler", &self.error_handler.is_some())
            .field("compression", &self.compression)
            .field("compression_min_size", &self.compression_min_size)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_trace_options() {
        let ext = ExtensionOptions::default();
        assert_eq!(ext.timeout, Duration::from_secs(10));
        assert_eq!(ext.encoding, "utf-8");
        assert!(!ext.terminated);
        assert!(ext.span_ref().is_none());
        assert_eq!(ext.compression, Compression::None);
    }

    #[test]
    fn test_with_span_is_noop_without_span() {
        let ext = ExtensionOptions::default();
        let mut called = false;
        ext.with_span(|_, _| called = true);
        assert!(!called);
    }
}
