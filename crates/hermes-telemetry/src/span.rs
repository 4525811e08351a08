//! Per-request span lifecycle management.
//!
//! The [`SpanManager`] is the only owner of request spans. It decides
//! whether a request is sampled, starts the span under the inbound W3C
//! trace context, injects the outbound `traceparent`, and guarantees every
//! span is ended exactly once:
//!
//! - normally, through [`SpanManager::end_span`];
//! - by a safety timer, if the request never completes;
//! - by FIFO eviction, when the active table is full.
//!
//! Callers hold a [`SpanHandle`] and route every span operation through the
//! manager, so an ended span can never be touched again.

use crate::tracing::{HeaderExtractor, HeaderInjector};
use hermes_core::{Context, SpanRef};
use opentelemetry::global::{BoxedSpan, BoxedTracer};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Attribute key for the request id.
pub const REQUEST_ID_ATTRIBUTE: &str = "http.request_id";
/// Attribute key for the request method.
pub const METHOD_ATTRIBUTE: &str = "http.method";
/// Attribute key for the request route.
pub const ROUTE_ATTRIBUTE: &str = "http.route";

/// Produces extra span attributes from the request context.
pub type SpanAttributes = Arc<dyn Fn(&Context) -> Vec<KeyValue> + Send + Sync>;

/// Span manager configuration.
#[derive(Debug, Clone)]
pub struct SpanManagerConfig {
    /// Probability in `[0, 1]` that a request gets a span.
    pub sampling_rate: f64,

    /// Safety timeout after which an unfinished span is force-ended.
    /// `None` disables the timer.
    pub span_timeout: Option<Duration>,

    /// Maximum number of spans tracked at once.
    pub max_active_spans: usize,
}

impl Default for SpanManagerConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 1.0,
            span_timeout: Some(Duration::from_secs(30)),
            max_active_spans: 10_000,
        }
    }
}

/// Handle to a span owned by a [`SpanManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanHandle {
    key: u64,
    span_ref: SpanRef,
}

impl SpanHandle {
    /// Returns the trace/span identifiers.
    #[must_use]
    pub const fn span_ref(&self) -> &SpanRef {
        &self.span_ref
    }

    /// Returns the hex trace id.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.span_ref.trace_id
    }
}

struct ActiveSpan {
    span: BoxedSpan,
    timer: Option<JoinHandle<()>>,
    created_at: Instant,
}

#[derive(Default)]
struct ActiveSpans {
    next_key: u64,
    // Keys are handed out in creation order, so the first entry is the oldest.
    entries: BTreeMap<u64, ActiveSpan>,
}

/// Creates, tracks and ends request spans.
pub struct SpanManager {
    config: SpanManagerConfig,
    active: Arc<Mutex<ActiveSpans>>,
    attributes: Option<SpanAttributes>,
    propagator: TraceContextPropagator,
}

impl SpanManager {
    /// Creates a manager with the given configuration.
    #[must_use]
    pub fn new(config: SpanManagerConfig) -> Self {
        Self {
            config,
            active: Arc::new(Mutex::new(ActiveSpans::default())),
            attributes: None,
            propagator: TraceContextPropagator::new(),
        }
    }

    /// Adds a callback contributing custom attributes to every new span.
    #[must_use]
    pub fn with_span_attributes(mut self, attributes: SpanAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SpanManagerConfig {
        &self.config
    }

    /// Returns the number of spans currently tracked.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().entries.len()
    }

    /// Returns `true` if the span has not been ended yet.
    #[must_use]
    pub fn is_active(&self, handle: &SpanHandle) -> bool {
        self.active.lock().entries.contains_key(&handle.key)
    }

    /// Starts a span for the request, if it is sampled.
    ///
    /// The inbound headers (or gRPC metadata) provide the parent context, the
    /// new span's `traceparent` is injected into the outbound headers, and
    /// the request id, method and route are recorded as attributes.
    ///
    /// Returns `None` for unsampled requests.
    pub fn create_span(
        &self,
        tracer: &BoxedTracer,
        ctx: &mut Context,
        service_name: &str,
    ) -> Option<SpanHandle> {
        if !self.sample() {
            ::tracing::trace!(path = ctx.path(), "request not sampled");
            return None;
        }

        let parent = self
            .propagator
            .extract(&HeaderExtractor(ctx.request_headers()));
        let mut span = tracer.start_with_context(service_name.to_string(), &parent);

        let span_context = span.span_context().clone();
        let outbound =
            opentelemetry::Context::new().with_remote_span_context(span_context.clone());
        self.propagator
            .inject_context(&outbound, &mut HeaderInjector(ctx.response_headers_mut()));

        span.set_attribute(KeyValue::new(
            REQUEST_ID_ATTRIBUTE,
            ctx.request_id().unwrap_or_default().to_string(),
        ));
        span.set_attribute(KeyValue::new(METHOD_ATTRIBUTE, ctx.method().to_string()));
        span.set_attribute(KeyValue::new(ROUTE_ATTRIBUTE, ctx.path().to_string()));
        if let Some(attributes) = &self.attributes {
            span.set_attributes(attributes(ctx));
        }

        let span_ref = SpanRef {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
        };
        let key = self.register(span);
        ::tracing::debug!(trace_id = %span_ref.trace_id, "span started");
        Some(SpanHandle { key, span_ref })
    }

    fn sample(&self) -> bool {
        let rate = self.config.sampling_rate;
        if rate >= 1.0 {
            return true;
        }
        rand::random::<f64>() < rate
    }

    fn register(&self, span: BoxedSpan) -> u64 {
        let max = self.config.max_active_spans.max(1);
        let mut evicted = Vec::new();
        let key = {
            let mut active = self.active.lock();
            while active.entries.len() >= max {
                match active.entries.pop_first() {
                    Some((_, entry)) => evicted.push(entry),
                    None => break,
                }
            }
            let key = active.next_key;
            active.next_key += 1;
            active.entries.insert(
                key,
                ActiveSpan {
                    span,
                    timer: None,
                    created_at: Instant::now(),
                },
            );
            key
        };

        for entry in evicted {
            ::tracing::warn!(
                age_ms = millis(entry.created_at.elapsed()),
                max_active_spans = max,
                "active span limit reached, force-ending oldest span"
            );
            finish(entry, Some("evicted: active span limit reached"));
        }

        if let Some(timeout) = self.config.span_timeout {
            self.arm_timer(key, timeout);
        }
        key
    }

    fn arm_timer(&self, key: u64, timeout: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            ::tracing::debug!("no async runtime, span safety timer disabled");
            return;
        };
        let active = Arc::clone(&self.active);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = active.lock().entries.remove(&key);
            if let Some(mut entry) = expired {
                // Dropping our own handle detaches; it does not cancel this task.
                entry.timer.take();
                ::tracing::warn!(
                    timeout_ms = millis(timeout),
                    "span not ended in time, force-ending"
                );
                finish(entry, Some("span timeout"));
            }
        });

        let mut active = self.active.lock();
        match active.entries.get_mut(&key) {
            Some(entry) => entry.timer = Some(timer),
            // Already ended or evicted before the timer was stored.
            None => timer.abort(),
        }
    }

    /// Sets one attribute on an active span.
    pub fn set_attribute(&self, handle: &SpanHandle, attribute: KeyValue) {
        if let Some(entry) = self.active.lock().entries.get_mut(&handle.key) {
            entry.span.set_attribute(attribute);
        }
    }

    /// Sets several attributes on an active span.
    pub fn set_attributes(&self, handle: &SpanHandle, attributes: Vec<KeyValue>) {
        if let Some(entry) = self.active.lock().entries.get_mut(&handle.key) {
            entry.span.set_attributes(attributes);
        }
    }

    /// Records an event on an active span.
    pub fn add_event(&self, handle: &SpanHandle, name: &'static str, attributes: Vec<KeyValue>) {
        if let Some(entry) = self.active.lock().entries.get_mut(&handle.key) {
            entry.span.add_event(name, attributes);
        }
    }

    /// Marks an active span as failed.
    pub fn set_error(&self, handle: &SpanHandle, description: impl Into<String>) {
        if let Some(entry) = self.active.lock().entries.get_mut(&handle.key) {
            entry.span.set_status(Status::error(description.into()));
        }
    }

    /// Ends the span and cancels its safety timer.
    ///
    /// Ending a span that was already ended, timed out or evicted is a no-op.
    pub fn end_span(&self, handle: &SpanHandle) {
        let entry = self.active.lock().entries.remove(&handle.key);
        match entry {
            Some(entry) => finish(entry, None),
            None => ::tracing::trace!(trace_id = %handle.span_ref.trace_id, "span already ended"),
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn finish(mut entry: ActiveSpan, forced: Option<&'static str>) {
    if let Some(timer) = entry.timer.take() {
        timer.abort();
    }
    if let Some(reason) = forced {
        entry.span.set_status(Status::error(reason));
    }
    entry.span.end();
}

impl Default for SpanManager {
    fn default() -> Self {
        Self::new(SpanManagerConfig::default())
    }
}

impl fmt::Debug for SpanManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanManager")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}
