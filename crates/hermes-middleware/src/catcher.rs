//! Error normalization.
//!
//! Every failure that reaches a protocol handler ends up here, is turned
//! into one [`Exception`] and rendered exactly once:
//!
//! 1. The message is taken from the error, else the context message. It is
//!    kept raw; the JSON payload builder escapes it.
//! 2. The status is the exception's own, else the context's error status,
//!    else 500. Generic errors are always 500.
//! 3. Domain exceptions render themselves (default renderer or their
//!    attached handler), carrying the current span.
//! 4. Generic errors go to the registered error handler if there is one,
//!    else to the default renderer with the diagnostic stack attached.
//!
//! If rendering fails, the failure is logged and a minimal protocol
//! default response is written instead.

use hermes_core::render::render_fallback;
use hermes_core::{Context, Exception, HandlerError, ResponseError, ResponseResult};
use http::StatusCode;

use crate::extension::ExtensionOptions;

/// Application code used for generic errors.
pub const GENERIC_ERROR_CODE: i32 = 1;

/// Normalizes `err` and renders it on the context's transport.
///
/// Never fails: rendering errors fall back to a minimal response.
pub async fn catch(ctx: &mut Context, err: HandlerError, ext: &ExtensionOptions) {
    let (exception, generic) = match err {
        HandlerError::Prevented => {
            tracing::debug!("prevented request reached the error catcher, nothing to render");
            return;
        }
        HandlerError::Exception(exception) => (normalize_exception(ctx, exception, ext), false),
        HandlerError::Other(err) => (normalize_generic(ctx, &err, ext), true),
    };

    ctx.set_status(exception.status());
    ext.with_span(|manager, span| manager.set_error(span, exception.message().to_string()));

    let result = match (&ext.error_handler, generic) {
        (Some(handler), true) => handler.render(ctx, exception).await,
        _ => exception.render(ctx).await,
    };
    match result {
        Ok(()) | Err(ResponseError::AlreadySent) => {}
        Err(err) => fallback(ctx, &err),
    }
}

fn normalize_exception(ctx: &Context, mut exception: Exception, ext: &ExtensionOptions) -> Exception {
    let message = pick_message(exception.message(), ctx);
    let status = if exception.status() == 0 {
        context_status(ctx)
    } else {
        exception.status()
    };
    exception.set_message(message);
    exception.set_status(status);
    exception.set_span(ext.span_ref());
    exception
}

fn normalize_generic(ctx: &Context, err: &anyhow::Error, ext: &ExtensionOptions) -> Exception {
    let message = pick_message(&err.to_string(), ctx);
    Exception::new(message)
        .with_code(GENERIC_ERROR_CODE)
        .with_status(StatusCode::INTERNAL_SERVER_ERROR.as_u16())
        .with_stack(format!("{err:?}"))
        .with_span(ext.span_ref())
}

fn pick_message(message: &str, ctx: &Context) -> String {
    if message.is_empty() {
        ctx.message().to_string()
    } else {
        message.to_string()
    }
}

fn context_status(ctx: &Context) -> u16 {
    if ctx.status() >= 400 {
        ctx.status()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR.as_u16()
    }
}

fn fallback(ctx: &mut Context, err: &ResponseError) {
    tracing::error!(
        request_id = ctx.request_id().unwrap_or_default(),
        error = %err,
        "failed to render error response, writing fallback"
    );
    let result: ResponseResult<()> = render_fallback(ctx);
    if let Err(err) = result {
        tracing::error!(error = %err, "failed to write fallback error response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{BoxFuture, ErrorHandler, GrpcCode};
    use http::{HeaderMap, Method};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn http_ctx() -> Context {
        Context::http(Method::GET, "/".parse().unwrap())
    }

    async fn json_body(ctx: &mut Context) -> (u16, serde_json::Value) {
        let response = ctx.take_response().unwrap();
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_generic_error_is_500() {
        let mut ctx = http_ctx();
        ctx.set_status(404);
        catch(&mut ctx, anyhow::anyhow!("boom").into(), &ExtensionOptions::default()).await;

        let (status, body) = json_body(&mut ctx).await;
        assert_eq!(status, 500);
        assert_eq!(body["message"], "boom");
        assert_eq!(body["code"], 1);
    }

    #[tokio::test]
    async fn test_message_quotes_escaped() {
        let mut ctx = http_ctx();
        let err = anyhow::anyhow!(r#"He said "hi""#);
        catch(&mut ctx, err.into(), &ExtensionOptions::default()).await;

        let response = ctx.take_response().unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#"He said \"hi\""#));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["message"], r#"He said "hi""#);
    }

    #[tokio::test]
    async fn test_exception_keeps_status_and_code() {
        let mut ctx = http_ctx();
        let exception = Exception::new("forbidden").with_code(4003).with_status(403);
        catch(&mut ctx, exception.into(), &ExtensionOptions::default()).await;

        let (status, body) = json_body(&mut ctx).await;
        assert_eq!(status, 403);
        assert_eq!(body["code"], 4003);
        assert_eq!(ctx.status(), 403);
    }

    #[tokio::test]
    async fn test_exception_without_status_uses_context() {
        let mut ctx = http_ctx();
        catch(&mut ctx, Exception::new("").into(), &ExtensionOptions::default()).await;

        let (status, body) = json_body(&mut ctx).await;
        assert_eq!(status, 404);
        assert_eq!(body["message"], "Not Found");
    }

    #[tokio::test]
    async fn test_exception_without_status_and_success_context_is_500() {
        let mut ctx = http_ctx();
        ctx.set_status(200);
        catch(&mut ctx, Exception::new("bad").into(), &ExtensionOptions::default()).await;
        let (status, _) = json_body(&mut ctx).await;
        assert_eq!(status, 500);
    }

    #[tokio::test]
    async fn test_grpc_status_mapping() {
        let (mut ctx, rx) = Context::grpc("/pkg.Svc/Get", HeaderMap::new(), serde_json::json!({}));
        let exception = Exception::new("denied").with_status(403);
        catch(&mut ctx, exception.into(), &ExtensionOptions::default()).await;

        let reply = rx.await.unwrap();
        let status = reply.result.unwrap_err();
        assert_eq!(status.code, GrpcCode::PermissionDenied);
        assert_eq!(status.message, "denied");
    }

    #[tokio::test]
    async fn test_quoted_message_reaches_grpc_unescaped() {
        let (mut ctx, rx) = Context::grpc("/pkg.Svc/Get", HeaderMap::new(), serde_json::json!({}));
        let exception = Exception::new(r#"He said "hi""#).with_status(400);
        catch(&mut ctx, exception.into(), &ExtensionOptions::default()).await;

        let status = rx.await.unwrap().result.unwrap_err();
        assert_eq!(status.message, r#"He said "hi""#);
    }

    struct Counting(AtomicUsize);

    impl ErrorHandler for Counting {
        fn render<'a>(
            &'a self,
            ctx: &'a mut Context,
            exception: Exception,
        ) -> BoxFuture<'a, ResponseResult<()>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                hermes_core::render::render_default(ctx, &exception.with_code(9000))
            })
        }
    }

    #[tokio::test]
    async fn test_global_handler_only_for_generic_errors() {
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        let ext = ExtensionOptions {
            error_handler: Some(handler.clone()),
            ..ExtensionOptions::default()
        };

        let mut ctx = http_ctx();
        catch(&mut ctx, anyhow::anyhow!("boom").into(), &ext).await;
        let (_, body) = json_body(&mut ctx).await;
        assert_eq!(body["code"], 9000);

        let mut ctx = http_ctx();
        catch(&mut ctx, Exception::new("domain").with_status(400).into(), &ext).await;
        let (_, body) = json_body(&mut ctx).await;
        assert_eq!(body["code"], 1);
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    struct Failing;

    impl ErrorHandler for Failing {
        fn render<'a>(
            &'a self,
            _ctx: &'a mut Context,
            _exception: Exception,
        ) -> BoxFuture<'a, ResponseResult<()>> {
            Box::pin(async { Err(ResponseError::Handler("renderer exploded".to_string())) })
        }
    }

    #[tokio::test]
    async fn test_render_failure_falls_back() {
        let ext = ExtensionOptions {
            error_handler: Some(Arc::new(Failing)),
            ..ExtensionOptions::default()
        };
        let mut ctx = http_ctx();
        catch(&mut ctx, anyhow::anyhow!("boom").into(), &ext).await;

        let response = ctx.take_response().unwrap();
        assert_eq!(response.status(), 500);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"Internal Server Error");
    }

    #[tokio::test]
    async fn test_prevented_renders_nothing() {
        let mut ctx = http_ctx();
        catch(&mut ctx, HandlerError::Prevented, &ExtensionOptions::default()).await;
        assert!(!ctx.is_responded());
    }
}
