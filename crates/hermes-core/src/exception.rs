//! The uniform exception model.
//!
//! Every failure that reaches a client is rendered from an [`Exception`]:
//! domain errors are constructed directly by handlers, generic errors and
//! deadline expiries are normalized into one by the error catcher, and a
//! >= 400 status left after a successful handler is synthesized into one.
//!
//! An exception renders itself onto the [`Context`] through
//! [`Exception::render`], which dispatches to a custom [`ErrorHandler`] when
//! one is attached, and to the protocol default otherwise.

use crate::context::Context;
use crate::error::ResponseResult;
use crate::render;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifies the trace span a request was recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanRef {
    /// Hex-encoded trace id.
    pub trace_id: String,
    /// Hex-encoded span id.
    pub span_id: String,
}

impl fmt::Display for SpanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}

/// A user-supplied renderer for exceptions.
///
/// Registered once on the trace middleware and used for every error that
/// is not already a domain [`Exception`], or attached to an individual
/// exception with [`Exception::with_handler`].
///
/// # Example
///
/// ```
/// use hermes_core::{render, BoxFuture, Context, ErrorHandler, Exception, ResponseResult};
///
/// struct Audited;
///
/// impl ErrorHandler for Audited {
///     fn render<'a>(
///         &'a self,
///         ctx: &'a mut Context,
///         exception: Exception,
///     ) -> BoxFuture<'a, ResponseResult<()>> {
///         Box::pin(async move {
///             tracing::warn!(code = exception.code(), "audited failure");
///             render::render_default(ctx, &exception)
///         })
///     }
/// }
/// ```
pub trait ErrorHandler: Send + Sync + 'static {
    /// Renders `exception` onto the context's transport.
    fn render<'a>(
        &'a self,
        ctx: &'a mut Context,
        exception: Exception,
    ) -> BoxFuture<'a, ResponseResult<()>>;
}

/// A protocol-agnostic application error.
///
/// `code` is an application-defined error code (default 1). `status` is a
/// transport status in HTTP terms; zero means "unresolved" and renders as
/// 500 unless the error catcher resolves it first.
///
/// # Example
///
/// ```
/// use hermes_core::Exception;
///
/// let err = Exception::new("user not found").with_code(1004).with_status(404);
/// assert_eq!(err.message(), "user not found");
/// assert_eq!(err.code(), 1004);
/// assert_eq!(err.status(), 404);
///
/// let unresolved = Exception::new("oops");
/// assert_eq!(unresolved.code(), 1);
/// assert_eq!(unresolved.status(), 0);
/// assert_eq!(unresolved.resolved_status(), 500);
/// ```
#[derive(Clone)]
pub struct Exception {
    message: String,
    code: i32,
    status: u16,
    stack: Option<String>,
    span: Option<SpanRef>,
    handler: Option<Arc<dyn ErrorHandler>>,
}

impl Exception {
    /// Creates an exception with code 1 and an unresolved status.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 1,
            status: 0,
            stack: None,
            span: None,
            handler: None,
        }
    }

    /// Sets the application error code.
    #[must_use]
    pub const fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    /// Sets the transport status.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Attaches a server-side diagnostic trace.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attaches the request's trace span.
    #[must_use]
    pub fn with_span(mut self, span: Option<SpanRef>) -> Self {
        self.span = span;
        self
    }

    /// Attaches a custom renderer used instead of the protocol default.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Replaces the message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Returns the application error code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Returns the transport status, zero when unresolved.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Sets the transport status.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Returns the status to render, treating zero as 500.
    #[must_use]
    pub const fn resolved_status(&self) -> u16 {
        if self.status == 0 {
            500
        } else {
            self.status
        }
    }

    /// Returns the diagnostic trace, if any.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Returns the trace span this exception was recorded under.
    #[must_use]
    pub const fn span(&self) -> Option<&SpanRef> {
        self.span.as_ref()
    }

    /// Sets the trace span.
    pub fn set_span(&mut self, span: Option<SpanRef>) {
        self.span = span;
    }

    /// Returns `true` if a custom renderer is attached.
    #[must_use]
    pub const fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Renders this exception onto the context's transport.
    ///
    /// Consumes the exception; each exception is rendered at most once.
    pub fn render(self, ctx: &mut Context) -> BoxFuture<'_, ResponseResult<()>> {
        match self.handler.clone() {
            Some(handler) => Box::pin(async move { handler.render(ctx, self).await }),
            None => Box::pin(async move { render::render_default(ctx, &self) }),
        }
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("message", &self.message)
            .field("code", &self.code)
            .field("status", &self.status)
            .field("stack", &self.stack)
            .field("span", &self.span)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Exception {}
