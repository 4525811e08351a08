//! HTTP transport.

use hermes_core::{Context, Protocol, ResponseResult};
use ::http::StatusCode;

use super::TransportAdapter;
use crate::extension::ExtensionOptions;
use crate::respond::respond;

/// Writes buffered or streamed HTTP responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpAdapter;

impl TransportAdapter for HttpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn security_headers(&self) -> bool {
        true
    }

    fn send(&self, ctx: &mut Context, ext: &ExtensionOptions) -> ResponseResult<()> {
        respond(ctx, ext)
    }

    fn acknowledge(&self, ctx: &mut Context, ext: &ExtensionOptions) -> ResponseResult<()> {
        if ctx.status() == StatusCode::NOT_FOUND.as_u16() && !ctx.is_status_explicit() {
            ctx.set_status(StatusCode::OK.as_u16());
        }
        respond(ctx, ext)
    }
}
