//! Middleware pipeline.
//!
//! Stages run in the order they were added, then the handler. The
//! [`TraceMiddleware`](crate::TraceMiddleware) is meant to be the first
//! stage: it owns the request id, the span, the deadline and the final
//! response, so later stages and the handler can simply return errors.

use std::sync::Arc;

use hermes_core::{render, Context, GrpcCode, Response, RpcReply, RpcStatus};
use http::HeaderMap;

use crate::middleware::{Handler, HandlerResult, Middleware, Next};

/// A type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An ordered middleware chain ending in a handler.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder()
///     .stage(TraceMiddleware::builder().options(options).build())
///     .build(users_handler);
///
/// let response = pipeline.serve_http(&request).await;
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs the chain over `ctx`.
    pub async fn run(&self, ctx: &mut Context) -> HandlerResult {
        let mut next = Next::handler(self.handler.as_ref());
        for stage in self.stages.iter().rev() {
            next = Next::new(stage.as_ref(), next);
        }
        next.run(ctx).await
    }

    /// Runs an HTTP request and returns the written response.
    ///
    /// If nothing in the chain wrote a response, a plain 500 is returned.
    pub async fn serve_http<B>(&self, request: &http::Request<B>) -> Response {
        let mut ctx = Context::from_request(request);
        if let Err(err) = self.run(&mut ctx).await {
            tracing::error!(error = %err, "unhandled error escaped the pipeline");
        }
        if let Some(response) = ctx.take_response() {
            return response;
        }
        if let Err(err) = render::render_fallback(&mut ctx) {
            tracing::error!(error = %err, "failed to write fallback response");
        }
        ctx.take_response().unwrap_or_else(|| {
            let mut response = Response::new(hermes_core::response::empty());
            *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
    }

    /// Runs a unary gRPC call and returns its reply.
    ///
    /// A call that completes without replying yields `UNKNOWN`.
    pub async fn serve_grpc(
        &self,
        path: &str,
        metadata: HeaderMap,
        message: serde_json::Value,
    ) -> RpcReply {
        let (mut ctx, reply) = Context::grpc(path, metadata, message);
        if let Err(err) = self.run(&mut ctx).await {
            tracing::error!(error = %err, "unhandled error escaped the pipeline");
        }
        drop(ctx);
        reply.await.unwrap_or_else(|_| RpcReply {
            metadata: HeaderMap::new(),
            result: Err(RpcStatus::new(GrpcCode::Unknown, "call completed without a reply")),
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared stage.
    #[must_use]
    pub fn shared_stage(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Finishes the pipeline with its handler.
    #[must_use]
    pub fn build<H: Handler>(self, handler: H) -> Pipeline {
        Pipeline {
            stages: self.stages,
            handler: Arc::new(handler),
        }
    }
}
