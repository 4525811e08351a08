//! WebSocket transport.

use hermes_core::{Context, Protocol, ResponseResult};

use super::TransportAdapter;
use crate::extension::ExtensionOptions;

/// Sends the response body as a text frame.
///
/// The socket stays open after the frame, so there is no single final
/// response to guard; `finalize` does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsAdapter;

impl WsAdapter {
    fn frame(ctx: &mut Context) -> ResponseResult<()> {
        if ctx.body().is_empty() {
            return Ok(());
        }
        let text = ctx.body().inspect();
        ctx.ws_send(text)
    }
}

impl TransportAdapter for WsAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Ws
    }

    fn security_headers(&self) -> bool {
        true
    }

    fn send(&self, ctx: &mut Context, _ext: &ExtensionOptions) -> ResponseResult<()> {
        Self::frame(ctx)
    }

    fn acknowledge(&self, ctx: &mut Context, _ext: &ExtensionOptions) -> ResponseResult<()> {
        Self::frame(ctx)
    }

    fn finalize(&self, _ctx: &mut Context, _ext: &ExtensionOptions) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::http::Request;

    fn upgrade() -> Request<()> {
        Request::builder().uri("/live").body(()).unwrap()
    }

    #[test]
    fn test_send_inspects_body() {
        let (mut ctx, mut rx) = Context::websocket(&upgrade());
        ctx.set_body(serde_json::json!({"ok": true}));
        WsAdapter.send(&mut ctx, &ExtensionOptions::default()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), r#"{"ok":true}"#);

        ctx.set_body("plain");
        WsAdapter.send(&mut ctx, &ExtensionOptions::default()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "plain");
    }

    #[test]
    fn test_empty_body_sends_nothing() {
        let (mut ctx, mut rx) = Context::websocket(&upgrade());
        WsAdapter
            .acknowledge(&mut ctx, &ExtensionOptions::default())
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
