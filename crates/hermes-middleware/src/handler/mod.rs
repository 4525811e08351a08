//! Protocol handlers.
//!
//! HTTP, gRPC and WebSocket share one request lifecycle, implemented once by
//! [`Lifecycle`] and specialized per transport through a [`TransportAdapter`]:
//!
//! ```text
//! PRE ──► RACE ──► OUTCOME ─┬─ SUCCESS ─► send
//!                           ├─ PREVENTED ─► acknowledge
//!                           └─ ERROR ─► catcher
//!                                         │
//!                               finalize ─┴─► POST (exactly once)
//! ```
//!
//! - **PRE** applies security headers, binds the charset and annotates the
//!   span, then arms a completion guard.
//! - **RACE** runs the rest of the chain against the request deadline,
//!   unless the request was already terminated by a draining server.
//! - **OUTCOME** renders the body, the acknowledgment or the error.
//! - **POST** logs the completion line and ends the span. If the request
//!   future is dropped before POST, the guard ends the span instead.

mod grpc;
mod http;
mod ws;

pub use self::grpc::GrpcAdapter;
pub use self::http::HttpAdapter;
pub use self::ws::WsAdapter;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use futures_util::FutureExt;
use hermes_core::render::render_fallback;
use hermes_core::{
    BoxFuture, Context, Exception, HandlerError, Protocol, ResponseError, ResponseResult,
};
use hermes_telemetry::span::METHOD_ATTRIBUTE;
use hermes_telemetry::{log_request_complete, SpanHandle, SpanManager};
use ::http::header::{HeaderValue, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION};
use ::http::StatusCode;
use opentelemetry::KeyValue;

use crate::catcher;
use crate::extension::ExtensionOptions;
use crate::middleware::{HandlerResult, Next};

/// Message of the deadline error.
pub const TIMEOUT_MESSAGE: &str = "Request Timeout";

/// Span attribute for the final status.
pub const STATUS_CODE_ATTRIBUTE: &str = "http.status_code";
/// Span attribute for the request URL.
pub const URL_ATTRIBUTE: &str = "http.url";

/// A protocol-specific request handler.
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Returns the transport this handler serves.
    fn protocol(&self) -> Protocol;

    /// Runs the full request lifecycle, with `next` as the downstream chain.
    ///
    /// Always leaves the transport answered (or, for sockets, notified) and
    /// the span ended.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a>,
        ext: &'a ExtensionOptions,
    ) -> BoxFuture<'a, ()>;
}

/// Transport-specific steps of the lifecycle.
pub trait TransportAdapter: Send + Sync + 'static {
    /// Transport served by this adapter.
    fn protocol(&self) -> Protocol;

    /// Whether responses carry the browser security headers.
    fn security_headers(&self) -> bool;

    /// Writes a successful response.
    fn send(&self, ctx: &mut Context, ext: &ExtensionOptions) -> ResponseResult<()>;

    /// Answers a request whose processing was prevented.
    fn acknowledge(&self, ctx: &mut Context, ext: &ExtensionOptions) -> ResponseResult<()>;

    /// Makes sure the transport was answered once the outcome is rendered.
    ///
    /// An error handler may answer by setting status and body on the
    /// context without writing; that state is sent as-is. The minimal
    /// fallback is written only if sending it fails.
    fn finalize(&self, ctx: &mut Context, ext: &ExtensionOptions) {
        if ctx.is_responded() {
            return;
        }
        tracing::debug!(
            protocol = %self.protocol(),
            status = ctx.status(),
            "request finished unanswered, sending context state"
        );
        let err = match self.send(ctx, ext) {
            Ok(()) | Err(ResponseError::AlreadySent) => return,
            Err(err) => err,
        };
        tracing::error!(
            request_id = ctx.request_id().unwrap_or_default(),
            protocol = %self.protocol(),
            error = %err,
            "failed to send response, writing fallback"
        );
        if let Err(err) = render_fallback(ctx) {
            tracing::error!(error = %err, "failed to write fallback response");
        }
    }
}

/// The shared request lifecycle for one transport.
#[derive(Debug, Default)]
pub struct Lifecycle<A> {
    adapter: A,
}

impl<A: TransportAdapter> Lifecycle<A> {
    /// Creates a lifecycle around `adapter`.
    pub const fn new(adapter: A) -> Self {
        Self { adapter }
    }

    /// Returns the transport adapter.
    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    fn prepare(&self, ctx: &mut Context, ext: &ExtensionOptions) {
        if self.adapter.security_headers() {
            let headers = ctx.response_headers_mut();
            headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
            headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
            headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        }
        ctx.set_encoding(ext.encoding.clone());
        ext.with_span(|manager, span| {
            manager.set_attributes(
                span,
                vec![
                    KeyValue::new(URL_ATTRIBUTE, ctx.uri().to_string()),
                    KeyValue::new(METHOD_ATTRIBUTE, ctx.method().to_string()),
                ],
            );
        });
    }

    async fn outcome(&self, ctx: &mut Context, ext: &ExtensionOptions, result: HandlerResult) {
        match result {
            Ok(body) => {
                if let Some(body) = body {
                    ctx.set_body(body);
                }
                if ctx.status() == StatusCode::NOT_FOUND.as_u16()
                    && !ctx.is_status_explicit()
                    && !ctx.body().is_empty()
                {
                    ctx.set_status(StatusCode::OK.as_u16());
                }
                if ctx.status() >= 400 {
                    let exception = Exception::new(ctx.message()).with_status(ctx.status());
                    catcher::catch(ctx, exception.into(), ext).await;
                    return;
                }
                if let Err(err) = self.adapter.send(ctx, ext) {
                    self.recover(ctx, &err);
                }
            }
            Err(HandlerError::Prevented) => {
                if ext.debug {
                    tracing::debug!(protocol = %self.adapter.protocol(), "request prevented");
                }
                if let Err(err) = self.adapter.acknowledge(ctx, ext) {
                    self.recover(ctx, &err);
                }
            }
            Err(err) => {
                tracing::error!(
                    request_id = ctx.request_id().unwrap_or_default(),
                    protocol = %self.adapter.protocol(),
                    error = %err,
                    stack = %err.stack().unwrap_or_default(),
                    "request failed"
                );
                catcher::catch(ctx, err, ext).await;
            }
        }
    }

    fn recover(&self, ctx: &mut Context, err: &ResponseError) {
        if matches!(err, ResponseError::AlreadySent) {
            return;
        }
        tracing::error!(
            request_id = ctx.request_id().unwrap_or_default(),
            protocol = %self.adapter.protocol(),
            error = %err,
            "failed to write response"
        );
        if let Err(err) = render_fallback(ctx) {
            tracing::error!(error = %err, "failed to write fallback response");
        }
    }
}

impl<A: TransportAdapter> ProtocolHandler for Lifecycle<A> {
    fn protocol(&self) -> Protocol {
        self.adapter.protocol()
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a>,
        ext: &'a ExtensionOptions,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.prepare(ctx, ext);
            let guard = Completion::arm(ext);

            let result = race(ctx, next, ext).await;
            if ext.debug {
                tracing::debug!(
                    protocol = %self.adapter.protocol(),
                    ok = result.is_ok(),
                    elapsed_ms = millis(ctx.elapsed().as_millis()),
                    "downstream settled"
                );
            }

            self.outcome(ctx, ext, result).await;
            self.adapter.finalize(ctx, ext);
            guard.complete(ctx);
        })
    }
}

async fn race(ctx: &mut Context, next: Next<'_>, ext: &ExtensionOptions) -> HandlerResult {
    if ext.terminated {
        return Ok(None);
    }
    let downstream = AssertUnwindSafe(next.run(ctx)).catch_unwind();
    match tokio::time::timeout(ext.timeout, downstream).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(HandlerError::Other(anyhow::anyhow!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Err(_) => Err(Exception::new(TIMEOUT_MESSAGE)
            .with_status(StatusCode::REQUEST_TIMEOUT.as_u16())
            .into()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn millis(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Runs the POST phase exactly once.
///
/// Completing consumes the guard; dropping it uncompleted means the request
/// future was cancelled, and the span is ended as failed.
struct Completion {
    span: Option<(Arc<SpanManager>, SpanHandle)>,
    completed: bool,
}

impl Completion {
    fn arm(ext: &ExtensionOptions) -> Self {
        let span = match (&ext.span_manager, &ext.span) {
            (Some(manager), Some(span)) => Some((Arc::clone(manager), span.clone())),
            _ => None,
        };
        Self {
            span,
            completed: false,
        }
    }

    fn complete(mut self, ctx: &Context) {
        self.completed = true;

        let start_time = ctx
            .start_time()
            .duration_since(UNIX_EPOCH)
            .map(|since| millis(since.as_millis()))
            .unwrap_or_default();
        let action = match ctx.protocol() {
            Protocol::Grpc => ctx.path().to_string(),
            _ => ctx.method().to_string(),
        };
        log_request_complete!(
            action = action,
            status = ctx.status(),
            start_time = start_time,
            duration_ms = millis(ctx.elapsed().as_millis()),
            request_id = ctx.request_id().unwrap_or_default(),
            path = ctx.path(),
        );

        if let Some((manager, span)) = &self.span {
            manager.set_attributes(
                span,
                vec![
                    KeyValue::new(STATUS_CODE_ATTRIBUTE, i64::from(ctx.status())),
                    KeyValue::new(METHOD_ATTRIBUTE, ctx.method().to_string()),
                    KeyValue::new(URL_ATTRIBUTE, ctx.uri().to_string()),
                ],
            );
            manager.add_event(span, "request", Vec::new());
            manager.end_span(span);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!("request cancelled before completion");
        if let Some((manager, span)) = &self.span {
            manager.set_error(span, "request cancelled");
            manager.end_span(span);
        }
    }
}
