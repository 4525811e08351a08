//! Request id resolution.
//!
//! ## Sources, in order
//!
//! | Protocol  | First                          | Then                           |
//! |-----------|--------------------------------|--------------------------------|
//! | gRPC      | call metadata `request_id_name` | request message field          |
//! | HTTP / WS | header `request_id_header_name` | query parameter `request_id_name` |
//!
//! Multi-valued headers and query parameters are joined with `.`. When no
//! source yields a value, the id factory mints one (UUID v4 by default).
//!
//! The resolved id is echoed back: as a response header for HTTP and
//! WebSocket, as outbound call metadata for gRPC.

use std::sync::Arc;

use hermes_config::TraceOptions;
use hermes_core::{Context, Protocol};
use http::{HeaderName, HeaderValue};
use uuid::Uuid;

/// Generates request ids.
pub type IdFactory = Arc<dyn Fn() -> String + Send + Sync>;

/// Returns the default factory, producing random UUID v4 strings.
#[must_use]
pub fn uuid_factory() -> IdFactory {
    Arc::new(|| Uuid::new_v4().to_string())
}

/// Resolves the request id for `ctx`. Never fails.
pub fn resolve(ctx: &Context, options: &TraceOptions, factory: &IdFactory) -> String {
    let found = match ctx.protocol() {
        Protocol::Grpc => from_metadata(ctx, &options.request_id_name)
            .or_else(|| from_message(ctx, &options.request_id_name)),
        Protocol::Http | Protocol::Ws | Protocol::Wss => {
            from_header(ctx, &options.request_id_header_name)
                .or_else(|| from_query(ctx, &options.request_id_name))
        }
    };
    found.unwrap_or_else(|| factory())
}

/// Writes the request id to the outbound headers or call metadata.
pub fn echo(ctx: &mut Context, options: &TraceOptions, request_id: &str) {
    let name = match ctx.protocol() {
        Protocol::Grpc => &options.request_id_name,
        Protocol::Http | Protocol::Ws | Protocol::Wss => &options.request_id_header_name,
    };
    let name = match HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
        Ok(name) => name,
        Err(err) => {
            tracing::warn!(name = %name, error = %err, "request id key is not a valid header name");
            return;
        }
    };
    match HeaderValue::from_str(request_id) {
        Ok(value) => {
            ctx.response_headers_mut().insert(name, value);
        }
        Err(err) => tracing::warn!(error = %err, "request id is not a valid header value"),
    }
}

fn from_header(ctx: &Context, name: &str) -> Option<String> {
    let values: Vec<&str> = ctx
        .request_headers()
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .collect();
    (!values.is_empty()).then(|| values.join("."))
}

fn from_query(ctx: &Context, name: &str) -> Option<String> {
    let values: Vec<String> = ctx
        .query(name)
        .into_iter()
        .filter(|value| !value.is_empty())
        .collect();
    (!values.is_empty()).then(|| values.join("."))
}

fn from_metadata(ctx: &Context, name: &str) -> Option<String> {
    // Metadata keys are lowercase on the wire.
    from_header(ctx, &name.to_ascii_lowercase())
}

fn from_message(ctx: &Context, name: &str) -> Option<String> {
    match ctx.request_message()?.get(name)? {
        serde_json::Value::String(value) if !value.is_empty() => Some(value.clone()),
        serde_json::Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};

    fn fixed() -> IdFactory {
        Arc::new(|| "generated".to_string())
    }

    fn http_ctx(uri: &str) -> Context {
        Context::http(Method::GET, uri.parse().unwrap())
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let ctx = http_ctx("/").with_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("abc"),
        );
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "abc");
    }

    #[test]
    fn test_multi_valued_header_is_joined() {
        let ctx = http_ctx("/")
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("a"),
            )
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("b"),
            );
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "a.b");
    }

    #[test]
    fn test_query_fallback() {
        let ctx = http_ctx("/users?requestId=q1&requestId=q2");
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "q1.q2");
    }

    #[test]
    fn test_generated_when_absent() {
        let ctx = http_ctx("/");
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "generated");
    }

    #[test]
    fn test_default_factory_is_uuid_v4() {
        let id = uuid_factory()();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_grpc_metadata_then_message() {
        let mut metadata = HeaderMap::new();
        metadata.insert("requestid", HeaderValue::from_static("meta"));
        let (ctx, _rx) = Context::grpc("/pkg.Svc/Get", metadata, serde_json::json!({}));
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "meta");

        let (ctx, _rx) = Context::grpc(
            "/pkg.Svc/Get",
            HeaderMap::new(),
            serde_json::json!({"requestId": "from-body"}),
        );
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "from-body");

        let (ctx, _rx) = Context::grpc("/pkg.Svc/Get", HeaderMap::new(), serde_json::json!({}));
        assert_eq!(resolve(&ctx, &TraceOptions::default(), &fixed()), "generated");
    }

    #[test]
    fn test_echo_per_protocol() {
        let options = TraceOptions::default();

        let mut ctx = http_ctx("/");
        echo(&mut ctx, &options, "abc");
        assert_eq!(ctx.response_headers()["x-request-id"], "abc");

        let (mut ctx, _rx) = Context::grpc("/pkg.Svc/Get", HeaderMap::new(), serde_json::json!({}));
        echo(&mut ctx, &options, "abc");
        assert_eq!(ctx.response_headers()["requestid"], "abc");
    }

    #[test]
    fn test_echo_skips_invalid_value() {
        let mut ctx = http_ctx("/");
        echo(&mut ctx, &TraceOptions::default(), "bad\nvalue");
        assert!(ctx.response_headers().is_empty());
    }
}
