//! gRPC transport.

use hermes_core::{Context, GrpcCode, Protocol, ResponseResult, RpcStatus};

use super::TransportAdapter;
use crate::extension::ExtensionOptions;

/// Completes unary calls through the reply callback.
///
/// An error status left on the context (by an error handler that did not
/// write) is replied as the matching gRPC status, with the body text or the
/// context message as its message.
///
/// Outbound response headers travel as call metadata. Browser security
/// headers do not apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcAdapter;

impl GrpcAdapter {
    fn reply(ctx: &mut Context) -> ResponseResult<()> {
        if ctx.is_responded() {
            return Ok(());
        }
        let body = ctx.take_body();
        if ctx.status() < 400 {
            return ctx.rpc_reply(Ok(body));
        }
        let message = if body.is_empty() {
            ctx.message().to_string()
        } else {
            body.inspect()
        };
        let status = RpcStatus::new(GrpcCode::from_http_status(ctx.status()), message);
        ctx.rpc_reply(Err(status))
    }
}

impl TransportAdapter for GrpcAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    fn security_headers(&self) -> bool {
        false
    }

    fn send(&self, ctx: &mut Context, _ext: &ExtensionOptions) -> ResponseResult<()> {
        Self::reply(ctx)
    }

    fn acknowledge(&self, ctx: &mut Context, _ext: &ExtensionOptions) -> ResponseResult<()> {
        Self::reply(ctx)
    }
}
