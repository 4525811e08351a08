//! Middleware chain.
//!
//! A [`Middleware`] receives the request [`Context`] and a [`Next`] handle to
//! the rest of the chain. The chain ends in a [`Handler`], the application
//! code that produces the response body.
//!
//! # Example
//!
//! ```ignore
//! use hermes_middleware::{BoxFuture, HandlerResult, Middleware, Next};
//! use hermes_core::Context;
//!
//! struct Tenant;
//!
//! impl Middleware for Tenant {
//!     fn name(&self) -> &'static str {
//!         "tenant"
//!     }
//!
//!     fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
//!         Box::pin(async move {
//!             ctx.response_headers_mut().insert("x-tenant", "acme".parse().unwrap());
//!             next.run(ctx).await
//!         })
//!     }
//! }
//! ```

use hermes_core::{Body, BoxFuture, Context, HandlerError};

/// What a handler (or the rest of the chain) returns.
///
/// `Ok(Some(body))` replaces the context body; `Ok(None)` keeps whatever the
/// handler wrote to the context.
pub type HandlerResult = Result<Option<Body>, HandlerError>;

/// Application code at the end of the chain.
///
/// Implemented for plain functions with the matching signature:
///
/// ```
/// use hermes_core::{BoxFuture, Context};
/// use hermes_middleware::HandlerResult;
///
/// fn hello(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
///     Box::pin(async { Ok(Some("hello".into())) })
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        self(ctx)
    }
}

/// A stage in the chain.
///
/// Middleware should call `next.run()` at most once; not calling it
/// short-circuits the chain.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this middleware, used in logs.
    fn name(&self) -> &'static str;

    /// Processes the request.
    fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// The remainder of the chain.
///
/// Consumed by [`run`](Next::run), so it can only be invoked once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(&'a dyn Handler),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that runs `middleware` before `next`.
    pub fn new(middleware: &'a dyn Middleware, next: Self) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// Invokes the next middleware or the handler.
    pub async fn run(self, ctx: &mut Context) -> HandlerResult {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, *next).await,
            NextInner::Handler(handler) => handler.call(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    struct Visit(&'static str);

    impl Middleware for Visit {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut Context,
            next: Next<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                ctx.response_headers_mut()
                    .append("x-visited", self.0.parse().unwrap());
                next.run(ctx).await
            })
        }
    }

    fn ok(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async { Ok(Some(Body::from("OK"))) })
    }

    fn ctx() -> Context {
        Context::http(Method::GET, "/test".parse().unwrap())
    }

    #[tokio::test]
    async fn test_next_handler() {
        let mut ctx = ctx();
        let result = Next::handler(&ok).run(&mut ctx).await.unwrap();
        assert_eq!(result.unwrap().inspect(), "OK");
    }

    #[tokio::test]
    async fn test_middleware_chain_order() {
        let first = Visit("first");
        let second = Visit("second");
        let mut ctx = ctx();

        let next = Next::new(&first, Next::new(&second, Next::handler(&ok)));
        next.run(&mut ctx).await.unwrap();

        let visited: Vec<_> = ctx
            .response_headers()
            .get_all("x-visited")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(visited, vec!["first", "second"]);
    }

    #[test]
    fn test_middleware_name() {
        assert_eq!(Visit("trace").name(), "trace");
    }
}
