//! The trace middleware.
//!
//! Entry point of the request lifecycle. For every request it:
//!
//! 1. rejects the request with a 503 if the server is draining;
//! 2. resolves, stores and echoes the request id;
//! 3. starts a span when tracing is enabled and the request is sampled;
//! 4. dispatches to the protocol handler for the request's transport,
//!    inside a `request` tracing span carrying the request id and trace id;
//! 5. records request metrics.
//!
//! Downstream code reads the request id from [`Context::request_id`] and
//! the span identifiers from the context extensions as a [`SpanRef`]. Log
//! lines emitted downstream inherit the `request` span's fields.
//!
//! [`SpanRef`]: hermes_core::SpanRef
//!
//! # Pipeline Position
//!
//! First stage. Everything after it runs inside the deadline and has its
//! errors rendered:
//!
//! ```text
//! Request → [Trace] → ...stages → Handler
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_middleware::{Pipeline, TraceMiddleware};
//!
//! let trace = TraceMiddleware::builder()
//!     .options(config.trace.clone())
//!     .tracer(guard.tracer())
//!     .build();
//!
//! let pipeline = Pipeline::builder().stage(trace).build(handler);
//! ```

use std::fmt;
use std::sync::Arc;

use hermes_config::TraceOptions;
use hermes_core::{BoxFuture, Context, ErrorHandler, Protocol};
use hermes_telemetry::metrics::{record_request, RequestMetrics};
use hermes_telemetry::span::{METHOD_ATTRIBUTE, REQUEST_ID_ATTRIBUTE};
use hermes_telemetry::{MetricsReporter, SpanAttributes, SpanManager};
use http::header::{HeaderValue, CONNECTION};
use http::StatusCode;
use opentelemetry::global::BoxedTracer;
use opentelemetry::KeyValue;
use tracing::Instrument;

use crate::drain::{DrainHandle, DRAINING_MESSAGE};
use crate::extension::ExtensionOptions;
use crate::factory::HandlerRegistry;
use crate::handler::STATUS_CODE_ATTRIBUTE;
use crate::middleware::{HandlerResult, Middleware, Next};
use crate::request_id::{self, IdFactory};

/// Request tracing, deadline and error normalization middleware.
pub struct TraceMiddleware {
    options: TraceOptions,
    tracer: Option<BoxedTracer>,
    spans: Arc<SpanManager>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    id_factory: IdFactory,
    reporter: Option<MetricsReporter>,
    drain: DrainHandle,
    registry: Arc<HandlerRegistry>,
}

impl TraceMiddleware {
    /// Creates the middleware with the given options and no tracer.
    #[must_use]
    pub fn new(options: TraceOptions) -> Self {
        Self::builder().options(options).build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> TraceMiddlewareBuilder {
        TraceMiddlewareBuilder::default()
    }

    /// Returns the trace options.
    #[must_use]
    pub const fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Returns the span manager owning this middleware's spans.
    #[must_use]
    pub fn span_manager(&self) -> &Arc<SpanManager> {
        &self.spans
    }

    /// Returns the draining flag.
    #[must_use]
    pub const fn drain_handle(&self) -> &DrainHandle {
        &self.drain
    }

    fn reject_if_draining(&self, ctx: &mut Context) -> bool {
        if !self.drain.is_draining() {
            return false;
        }
        ctx.set_status(StatusCode::SERVICE_UNAVAILABLE.as_u16());
        ctx.set_message(DRAINING_MESSAGE);
        if ctx.protocol() != Protocol::Grpc {
            ctx.response_headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }
        true
    }

    fn assign_request_id(&self, ctx: &mut Context) -> String {
        let request_id = match ctx.request_id() {
            Some(existing) => existing.to_string(),
            None => request_id::resolve(ctx, &self.options, &self.id_factory),
        };
        ctx.set_request_id(request_id.clone());
        request_id::echo(ctx, &self.options, &request_id);
        request_id
    }

    fn extension(&self, ctx: &mut Context, terminated: bool) -> ExtensionOptions {
        let span = match (&self.tracer, self.options.enable_trace) {
            (Some(tracer), true) => {
                self.spans
                    .create_span(tracer, ctx, &self.options.service_name)
            }
            _ => None,
        };
        ExtensionOptions {
            terminated,
            span,
            span_manager: Some(Arc::clone(&self.spans)),
            error_handler: self.error_handler.clone(),
            ..ExtensionOptions::from_options(&self.options)
        }
    }

    fn record(&self, ctx: &Context, request_id: &str) {
        let metrics = RequestMetrics {
            duration: ctx.elapsed(),
            status: ctx.status(),
            path: ctx.path().to_string(),
            protocol: ctx.protocol(),
            attributes: vec![
                KeyValue::new(REQUEST_ID_ATTRIBUTE, request_id.to_string()),
                KeyValue::new(METHOD_ATTRIBUTE, ctx.method().to_string()),
                KeyValue::new(STATUS_CODE_ATTRIBUTE, i64::from(ctx.status())),
            ],
        };
        record_request(&metrics);
        if let Some(reporter) = &self.reporter {
            reporter(&metrics);
        }
    }
}

impl Middleware for TraceMiddleware {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let terminated = self.reject_if_draining(ctx);
            let request_id = self.assign_request_id(ctx);
            let ext = self.extension(ctx, terminated);

            if ext.debug {
                tracing::debug!(
                    request_id = %request_id,
                    protocol = %ctx.protocol(),
                    path = ctx.path(),
                    sampled = ext.span.is_some(),
                    terminated,
                    "dispatching request"
                );
            }

            let span_ref = ext.span_ref();
            let request_span = tracing::info_span!(
                "request",
                request_id = %request_id,
                protocol = %ctx.protocol(),
                trace_id = tracing::field::Empty,
            );
            if let Some(span_ref) = span_ref {
                request_span.record("trace_id", span_ref.trace_id.as_str());
                ctx.extensions_mut().insert(span_ref);
            }

            let handler = self.registry.get(ctx.protocol());
            handler
                .handle(ctx, next, &ext)
                .instrument(request_span)
                .await;

            self.record(ctx, &request_id);
            Ok(None)
        })
    }
}

impl fmt::Debug for TraceMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceMiddleware")
            .field("options", &self.options)
            .field("tracer", &self.tracer.is_some())
            .field("spans", &self.spans)
            .field("error_handler", &self.error_handler.is_some())
            .field("drain", &self.drain)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TraceMiddleware`].
#[derive(Default)]
pub struct TraceMiddlewareBuilder {
    options: TraceOptions,
    tracer: Option<BoxedTracer>,
    span_attributes: Option<SpanAttributes>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    id_factory: Option<IdFactory>,
    reporter: Option<MetricsReporter>,
    drain: DrainHandle,
    registry: Option<Arc<HandlerRegistry>>,
}

impl TraceMiddlewareBuilder {
    /// Sets the trace options.
    pub fn options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the tracer spans are started with.
    ///
    /// Spans are only created when `enable_trace` is also set.
    pub fn tracer(mut self, tracer: impl Into<Option<BoxedTracer>>) -> Self {
        self.tracer = tracer.into();
        self
    }

    /// Adds a callback contributing custom span attributes.
    pub fn span_attributes(mut self, attributes: SpanAttributes) -> Self {
        self.span_attributes = Some(attributes);
        self
    }

    /// Sets the renderer for errors that are not domain exceptions.
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Replaces the request id generator.
    pub fn id_factory(mut self, factory: IdFactory) -> Self {
        self.id_factory = Some(factory);
        self
    }

    /// Registers a per-request metrics callback.
    pub fn metrics_reporter(mut self, reporter: MetricsReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Shares a draining flag with the server.
    pub fn drain(mut self, drain: DrainHandle) -> Self {
        self.drain = drain;
        self
    }

    /// Replaces the protocol handler registry.
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> TraceMiddleware {
        let mut spans = SpanManager::new(self.options.span_manager_config());
        if let Some(attributes) = self.span_attributes {
            spans = spans.with_span_attributes(attributes);
        }

        TraceMiddleware {
            options: self.options,
            tracer: self.tracer,
            spans: Arc::new(spans),
            error_handler: self.error_handler,
            id_factory: self.id_factory.unwrap_or_else(request_id::uuid_factory),
            reporter: self.reporter,
            drain: self.drain,
            registry: self.registry.unwrap_or_default(),
        }
    }
}
