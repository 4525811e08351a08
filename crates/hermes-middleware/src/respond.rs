//! HTTP response finalization.
//!
//! Turns the context's final `(status, body)` into the wire response:
//!
//! - 204, 205 and 304 end with no payload
//! - `HEAD` writes headers only
//! - an empty body falls back to the context message as text
//! - a 404 default with a body becomes 200
//! - text, bytes and streams pass through; JSON is serialized
//!
//! `Content-Length` is set for every buffered body.

use bytes::Bytes;
use hermes_core::{response, Body, Context, ResponseError, ResponseResult};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderValue, Method, StatusCode};

use crate::compression;
use crate::extension::ExtensionOptions;

/// Returns `true` for statuses that never carry a body.
#[must_use]
pub const fn is_empty_status(status: u16) -> bool {
    matches!(status, 204 | 205 | 304)
}

/// Writes the HTTP response from the context's status and body.
///
/// A response that was already written is left alone.
///
/// # Errors
///
/// Returns `ResponseError` if the body cannot be serialized or a header
/// value is invalid.
pub fn respond(ctx: &mut Context, ext: &ExtensionOptions) -> ResponseResult<()> {
    if ctx.is_responded() {
        return Ok(());
    }

    let mut body = ctx.take_body();
    if ctx.status() == StatusCode::NOT_FOUND.as_u16() && !ctx.is_status_explicit() && !body.is_empty()
    {
        ctx.set_status(StatusCode::OK.as_u16());
    }
    let status = StatusCode::from_u16(ctx.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if is_empty_status(status.as_u16()) {
        let headers = ctx.response_headers_mut();
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        return ctx.end(status, response::empty());
    }

    if body.is_empty() {
        body = Body::Text(ctx.message().to_string());
    }

    let payload = match body {
        Body::Stream(stream) => {
            set_content_type(ctx, "application/octet-stream", false)?;
            ctx.response_headers_mut().remove(CONTENT_LENGTH);
            if ctx.method() == Method::HEAD {
                return ctx.end(status, response::empty());
            }
            return ctx.end(status, response::streaming(stream));
        }
        Body::Empty => Bytes::new(),
        Body::Text(text) => {
            set_content_type(ctx, text_mime(&text), true)?;
            Bytes::from(text)
        }
        Body::Bytes(bytes) => {
            set_content_type(ctx, "application/octet-stream", false)?;
            bytes
        }
        Body::Json(value) => {
            set_content_type(ctx, "application/json", true)?;
            Bytes::from(serde_json::to_vec(&value).map_err(ResponseError::from)?)
        }
    };

    let request_headers = ctx.request_headers().clone();
    let headers = ctx.response_headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
    let payload = compression::apply(
        ext.compression,
        ext.compression_min_size,
        &request_headers,
        headers,
        payload,
    );

    if ctx.method() == Method::HEAD {
        return ctx.end(status, response::empty());
    }
    ctx.end(status, response::full(payload))
}

fn text_mime(text: &str) -> &'static str {
    if text.trim_start().starts_with('<') {
        "text/html"
    } else {
        "text/plain"
    }
}

fn set_content_type(ctx: &mut Context, mime: &str, charset: bool) -> ResponseResult<()> {
    if ctx.response_headers().contains_key(CONTENT_TYPE) {
        return Ok(());
    }
    let value = if charset {
        format!("{mime}; charset={}", ctx.encoding())
    } else {
        mime.to_string()
    };
    let value = HeaderValue::try_from(value).map_err(http::Error::from)?;
    ctx.response_headers_mut().insert(CONTENT_TYPE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn ctx(method: Method) -> Context {
        Context::http(method, "/".parse().unwrap())
    }

    async fn body_of(ctx: &mut Context) -> (u16, http::HeaderMap, Bytes) {
        let response = ctx.take_response().unwrap();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_json_body() {
        let mut ctx = ctx(Method::GET);
        ctx.set_body(serde_json::json!({"a": 1}));
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();

        let (status, headers, body) = body_of(&mut ctx).await;
        assert_eq!(status, 200);
        assert_eq!(headers[CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(headers[CONTENT_LENGTH], "7");
        assert_eq!(&body[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_empty_body_uses_message() {
        let mut ctx = ctx(Method::GET);
        ctx.set_status(201);
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();

        let (status, headers, body) = body_of(&mut ctx).await;
        assert_eq!(status, 201);
        assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(&body[..], b"Created");
    }

    #[tokio::test]
    async fn test_no_content_strips_body() {
        let mut ctx = ctx(Method::GET);
        ctx.set_status(204);
        ctx.set_body("ignored");
        ctx.response_headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();

        let (status, headers, body) = body_of(&mut ctx).await;
        assert_eq!(status, 204);
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_head_has_length_but_no_body() {
        let mut ctx = ctx(Method::HEAD);
        ctx.set_body("hello");
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();

        let (status, headers, body) = body_of(&mut ctx).await;
        assert_eq!(status, 200);
        assert_eq!(headers[CONTENT_LENGTH], "5");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_html_text_detected() {
        let mut ctx = ctx(Method::GET);
        ctx.set_body("<p>hi</p>");
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();
        let (_, headers, _) = body_of(&mut ctx).await;
        assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[tokio::test]
    async fn test_stream_passes_through() {
        use futures_util::StreamExt;

        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ];
        let mut ctx = ctx(Method::GET);
        ctx.set_body(Body::Stream(futures_util::stream::iter(chunks).boxed()));
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();

        let (status, headers, body) = body_of(&mut ctx).await;
        assert_eq!(status, 200);
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(&body[..], b"ab");
    }

    #[tokio::test]
    async fn test_explicit_404_with_body_kept() {
        let mut ctx = ctx(Method::GET);
        ctx.set_status(404);
        ctx.set_body("missing");
        respond(&mut ctx, &ExtensionOptions::default()).unwrap();
        let (status, _, _) = body_of(&mut ctx).await;
        assert_eq!(status, 404);
    }

    #[test]
    fn test_already_responded_is_noop() {
        let mut ctx = ctx(Method::GET);
        ctx.end(StatusCode::ACCEPTED, response::empty()).unwrap();
        assert!(respond(&mut ctx, &ExtensionOptions::default()).is_ok());
        assert_eq!(ctx.take_response().unwrap().status(), StatusCode::ACCEPTED);
    }
}
