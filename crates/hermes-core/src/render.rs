//! Protocol-default exception renderers.
//!
//! | Protocol | Rendering |
//! |----------|-----------|
//! | HTTP     | JSON, HTML or text payload chosen from `Content-Type` / `Accept` |
//! | gRPC     | status mapped through [`GrpcCode::from_http_status`] |
//! | WS / WSS | JSON payload sent as a text frame |
//!
//! The JSON payload is `{"code":<code>,"message":"<message>"}`. Exceptions
//! carry the raw message; [`json_payload`] escapes it on the way out so the
//! HTML and gRPC renderers see the text the application wrote.

use crate::context::{Context, Protocol};
use crate::error::{ResponseError, ResponseResult};
use crate::exception::Exception;
use crate::grpc::{GrpcCode, RpcStatus};
use crate::response;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};

const FALLBACK_MESSAGE: &str = "Internal Server Error";

/// Payload format negotiated for HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    /// `application/json`
    Json,
    /// `text/html`
    Html,
    /// `text/plain`
    Text,
}

impl ErrorFormat {
    /// Picks a format from the request headers.
    ///
    /// A request `Content-Type` wins; otherwise the first acceptable type in
    /// `Accept` is used. JSON is the default.
    #[must_use]
    pub fn negotiate(headers: &HeaderMap) -> Self {
        if let Some(content_type) = header_str(headers, CONTENT_TYPE.as_str()) {
            let content_type = content_type.to_ascii_lowercase();
            return if content_type.contains("json") {
                Self::Json
            } else if content_type.contains("html") {
                Self::Html
            } else {
                Self::Text
            };
        }

        let Some(accept) = header_str(headers, ACCEPT.as_str()) else {
            return Self::Json;
        };
        for media in accept.split(',') {
            let media = media
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            match media.as_str() {
                "application/json" | "*/*" | "application/*" => return Self::Json,
                "text/html" => return Self::Html,
                "text/plain" | "text/*" => return Self::Text,
                _ if media.ends_with("+json") => return Self::Json,
                _ => {}
            }
        }
        Self::Json
    }

    const fn mime(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Html => "text/html",
            Self::Text => "text/plain",
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Escapes a message for interpolation inside a JSON string literal.
///
/// ```
/// use hermes_core::render::escape_message;
///
/// assert_eq!(escape_message(r#"He said "hi""#), r#"He said \"hi\""#);
/// ```
#[must_use]
pub fn escape_message(message: &str) -> String {
    let quoted = serde_json::Value::String(message.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Builds the `{"code":..,"message":".."}` payload.
///
/// ```
/// use hermes_core::{render::json_payload, Exception};
///
/// let payload = json_payload(&Exception::new(r#"He said "hi""#).with_code(7));
/// assert_eq!(payload, r#"{"code":7,"message":"He said \"hi\""}"#);
/// ```
#[must_use]
pub fn json_payload(exception: &Exception) -> String {
    format!(
        r#"{{"code":{},"message":"{}"}}"#,
        exception.code(),
        escape_message(exception.message())
    )
}

fn html_page(exception: &Exception) -> String {
    let status = exception.resolved_status();
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Error {status}</title></head>\
         <body><h1>Error {status}</h1><p>code: {}</p><p>{}</p></body></html>",
        exception.code(),
        escape_html(exception.message())
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Renders an exception with the default renderer for the context's protocol.
pub fn render_default(ctx: &mut Context, exception: &Exception) -> ResponseResult<()> {
    match ctx.protocol() {
        Protocol::Http => render_http(ctx, exception),
        Protocol::Grpc => render_grpc(ctx, exception),
        Protocol::Ws | Protocol::Wss => render_ws(ctx, exception),
    }
}

/// Writes an HTTP error response.
pub fn render_http(ctx: &mut Context, exception: &Exception) -> ResponseResult<()> {
    let status = StatusCode::from_u16(exception.resolved_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let format = ErrorFormat::negotiate(ctx.request_headers());
    let payload = match format {
        ErrorFormat::Html => html_page(exception),
        ErrorFormat::Json | ErrorFormat::Text => json_payload(exception),
    };

    let content_type =
        HeaderValue::try_from(format!("{}; charset={}", format.mime(), ctx.encoding()))
            .map_err(http::Error::from)?;
    let headers = ctx.response_headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));

    ctx.set_status(status.as_u16());
    ctx.end(status, response::full(payload))
}

/// Completes a gRPC call with an error status.
pub fn render_grpc(ctx: &mut Context, exception: &Exception) -> ResponseResult<()> {
    let status = exception.resolved_status();
    ctx.set_status(status);
    let code = match GrpcCode::from_http_status(status) {
        GrpcCode::Ok => GrpcCode::Unknown,
        code => code,
    };
    let message = if exception.message().is_empty() {
        code.description()
    } else {
        exception.message()
    };
    ctx.rpc_reply(Err(RpcStatus::new(code, message)))
}

/// Sends the JSON error payload over the socket.
pub fn render_ws(ctx: &mut Context, exception: &Exception) -> ResponseResult<()> {
    ctx.set_status(exception.resolved_status());
    ctx.ws_send(json_payload(exception))
}

/// Writes the minimal protocol-default error response.
///
/// Used when rendering an exception failed. Transports that were already
/// answered are left untouched.
pub fn render_fallback(ctx: &mut Context) -> ResponseResult<()> {
    let result = match ctx.protocol() {
        Protocol::Http if ctx.is_responded() => Ok(()),
        Protocol::Http => {
            let headers = ctx.response_headers_mut();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            headers.insert(CONTENT_LENGTH, HeaderValue::from(FALLBACK_MESSAGE.len()));
            ctx.end(
                StatusCode::INTERNAL_SERVER_ERROR,
                response::full(FALLBACK_MESSAGE),
            )
        }
        Protocol::Grpc => {
            ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
            ctx.rpc_reply(Err(RpcStatus::new(GrpcCode::Unknown, FALLBACK_MESSAGE)))
        }
        Protocol::Ws | Protocol::Wss => {
            ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
            ctx.ws_send(FALLBACK_MESSAGE.to_string())
        }
    };
    match result {
        Err(ResponseError::AlreadySent) => Ok(()),
        other => other,
    }
}
