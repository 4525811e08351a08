//! Per-request context shared by every protocol.
//!
//! The [`Context`] is the single mutable object threaded through the
//! middleware chain. It carries the inbound request view (protocol, method,
//! path, headers or call metadata), the outbound response state (status,
//! message, body, headers), the request id, and a transport sink that
//! enforces exactly one response per request.

use crate::body::Body;
use crate::error::{ResponseError, ResponseResult};
use crate::grpc::RpcStatus;
use crate::response::{Response, ResponseBody};
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use std::fmt;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, oneshot};

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain HTTP (and HTTPS).
    Http,
    /// gRPC unary call.
    Grpc,
    /// WebSocket.
    Ws,
    /// Secure WebSocket.
    Wss,
}

impl Protocol {
    /// Parses a protocol tag, case-insensitively.
    ///
    /// `https` is treated as [`Protocol::Http`]. Unrecognized tags return
    /// `None`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Self::Http),
            "grpc" => Some(Self::Grpc),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    /// Returns the lowercase protocol tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    /// Returns `true` for `ws` and `wss`.
    #[must_use]
    pub const fn is_websocket(self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply delivered to the gRPC transport when a call completes.
#[derive(Debug)]
pub struct RpcReply {
    /// Outbound call metadata (request id, trace headers, ...).
    pub metadata: HeaderMap,
    /// The response message, or a terminal error status.
    pub result: Result<Body, RpcStatus>,
}

enum Sink {
    Http { response: Option<Response>, ended: bool },
    Rpc { reply: Option<oneshot::Sender<RpcReply>> },
    Socket { sender: mpsc::UnboundedSender<String> },
}

/// Per-request context.
///
/// # Example
///
/// ```
/// use hermes_core::{Context, Protocol};
/// use http::Method;
///
/// let mut ctx = Context::http(Method::GET, "/users?id=7".parse().unwrap());
/// assert_eq!(ctx.protocol(), Protocol::Http);
/// assert_eq!(ctx.status(), 404);
/// assert_eq!(ctx.query("id"), vec!["7".to_string()]);
///
/// assert!(ctx.set_request_id("abc"));
/// assert!(!ctx.set_request_id("def"));
/// assert_eq!(ctx.request_id(), Some("abc"));
/// ```
pub struct Context {
    protocol: Protocol,
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
    request_message: Option<serde_json::Value>,
    status: u16,
    explicit_status: bool,
    message: Option<String>,
    body: Body,
    response_headers: HeaderMap,
    encoding: String,
    request_id: Option<String>,
    started_at: Instant,
    start_time: SystemTime,
    extensions: Extensions,
    sink: Sink,
}

impl Context {
    fn with_sink(protocol: Protocol, method: Method, uri: Uri, sink: Sink) -> Self {
        Self {
            protocol,
            method,
            uri,
            request_headers: HeaderMap::new(),
            request_message: None,
            status: StatusCode::NOT_FOUND.as_u16(),
            explicit_status: false,
            message: None,
            body: Body::Empty,
            response_headers: HeaderMap::new(),
            encoding: "utf-8".to_string(),
            request_id: None,
            started_at: Instant::now(),
            start_time: SystemTime::now(),
            extensions: Extensions::new(),
            sink,
        }
    }

    /// Creates an HTTP context with no headers.
    #[must_use]
    pub fn http(method: Method, uri: Uri) -> Self {
        Self::with_sink(
            Protocol::Http,
            method,
            uri,
            Sink::Http {
                response: None,
                ended: false,
            },
        )
    }

    /// Creates an HTTP context from an inbound request.
    ///
    /// The request body is not consumed; handlers read it from their own
    /// request handle.
    #[must_use]
    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        Self::http(request.method().clone(), request.uri().clone())
            .with_headers(request.headers().clone())
    }

    /// Creates a gRPC context for a unary call.
    ///
    /// `metadata` is the inbound call metadata and `message` the decoded
    /// request message. The returned receiver yields the call's single
    /// [`RpcReply`].
    #[must_use]
    pub fn grpc(
        path: &str,
        metadata: HeaderMap,
        message: serde_json::Value,
    ) -> (Self, oneshot::Receiver<RpcReply>) {
        let (tx, rx) = oneshot::channel();
        let uri = path.parse().unwrap_or_else(|_| Uri::from_static("/"));
        let mut ctx = Self::with_sink(
            Protocol::Grpc,
            Method::POST,
            uri,
            Sink::Rpc { reply: Some(tx) },
        );
        ctx.request_headers = metadata;
        ctx.request_message = Some(message);
        (ctx, rx)
    }

    /// Creates a WebSocket context from the upgrade request.
    ///
    /// The returned receiver yields every text frame sent to the client.
    /// A `wss` URI scheme marks the context as [`Protocol::Wss`].
    #[must_use]
    pub fn websocket<B>(upgrade: &http::Request<B>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let protocol = if upgrade.uri().scheme_str() == Some("wss") {
            Protocol::Wss
        } else {
            Protocol::Ws
        };
        let mut ctx = Self::with_sink(
            protocol,
            upgrade.method().clone(),
            upgrade.uri().clone(),
            Sink::Socket { sender: tx },
        );
        ctx.request_headers = upgrade.headers().clone();
        (ctx, rx)
    }

    /// Replaces the inbound headers (or call metadata).
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    /// Adds one inbound header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.request_headers.append(name, value);
        self
    }

    /// Returns the transport protocol.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns inbound headers, or call metadata for gRPC.
    #[must_use]
    pub const fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Returns every value of a query parameter, in order of appearance.
    #[must_use]
    pub fn query(&self, name: &str) -> Vec<String> {
        let Some(query) = self.uri.query() else {
            return Vec::new();
        };
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .unwrap_or_default()
            .into_iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value)
            .collect()
    }

    /// Returns the decoded gRPC request message, if any.
    #[must_use]
    pub const fn request_message(&self) -> Option<&serde_json::Value> {
        self.request_message.as_ref()
    }

    /// Returns the current response status.
    ///
    /// Defaults to 404 until something sets it.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Sets the response status.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
        self.explicit_status = true;
    }

    /// Returns `true` once the status was set explicitly.
    #[must_use]
    pub const fn is_status_explicit(&self) -> bool {
        self.explicit_status
    }

    /// Returns the response message, falling back to the status reason.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| {
            StatusCode::from_u16(self.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("")
        })
    }

    /// Sets the response message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Returns the response body.
    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// Sets the response body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Moves the response body out of the context.
    pub fn take_body(&mut self) -> Body {
        self.body.take()
    }

    /// Returns outbound headers, or outbound call metadata for gRPC.
    #[must_use]
    pub const fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Returns outbound headers mutably.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Returns the response charset.
    #[must_use]
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Sets the response charset.
    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.encoding = encoding.into();
    }

    /// Returns the request id, once resolved.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Stores the request id. Only the first call has any effect.
    ///
    /// Returns `true` if the id was stored.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) -> bool {
        if let Some(current) = &self.request_id {
            tracing::trace!(request_id = %current, "request id already set, keeping it");
            return false;
        }
        self.request_id = Some(request_id.into());
        true
    }

    /// Returns the wall-clock time the request started.
    #[must_use]
    pub const fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns request-scoped extension values.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns request-scoped extension values mutably.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Returns `true` once the transport received its final response.
    ///
    /// WebSocket contexts never report as responded; frames may be sent
    /// until the socket closes.
    #[must_use]
    pub const fn is_responded(&self) -> bool {
        match &self.sink {
            Sink::Http { ended, .. } => *ended,
            Sink::Rpc { reply } => reply.is_none(),
            Sink::Socket { .. } => false,
        }
    }

    /// Writes the HTTP response. Only the first call succeeds.
    ///
    /// The response carries the context's outbound headers.
    pub fn end(&mut self, status: StatusCode, body: ResponseBody) -> ResponseResult<()> {
        let headers = self.response_headers.clone();
        let Sink::Http { response, ended } = &mut self.sink else {
            return Err(ResponseError::Unsupported(self.protocol));
        };
        if *ended {
            return Err(ResponseError::AlreadySent);
        }
        let mut built = http::Response::new(body);
        *built.status_mut() = status;
        *built.headers_mut() = headers;
        *response = Some(built);
        *ended = true;
        self.status = status.as_u16();
        Ok(())
    }

    /// Takes the written HTTP response out of the context.
    pub fn take_response(&mut self) -> Option<Response> {
        match &mut self.sink {
            Sink::Http { response, .. } => response.take(),
            _ => None,
        }
    }

    /// Completes the gRPC call. Only the first call succeeds.
    pub fn rpc_reply(&mut self, result: Result<Body, RpcStatus>) -> ResponseResult<()> {
        let metadata = self.response_headers.clone();
        let Sink::Rpc { reply } = &mut self.sink else {
            return Err(ResponseError::Unsupported(self.protocol));
        };
        let sender = reply.take().ok_or(ResponseError::AlreadySent)?;
        sender
            .send(RpcReply { metadata, result })
            .map_err(|_| ResponseError::ChannelClosed)
    }

    /// Sends a text frame over the WebSocket.
    pub fn ws_send(&mut self, text: String) -> ResponseResult<()> {
        let Sink::Socket { sender } = &self.sink else {
            return Err(ResponseError::Unsupported(self.protocol));
        };
        sender.send(text).map_err(|_| ResponseError::ChannelClosed)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("protocol", &self.protocol)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("status", &self.status)
            .field("request_id", &self.request_id)
            .field("body", &self.body)
            .field("responded", &self.is_responded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::GrpcCode;
    use crate::response;

    fn get(uri: &str) -> Context {
        Context::http(Method::GET, uri.parse().unwrap())
    }

    #[test]
    fn test_protocol_tags() {
        assert_eq!(Protocol::from_tag("HTTP"), Some(Protocol::Http));
        assert_eq!(Protocol::from_tag("https"), Some(Protocol::Http));
        assert_eq!(Protocol::from_tag("grpc"), Some(Protocol::Grpc));
        assert_eq!(Protocol::from_tag("wss"), Some(Protocol::Wss));
        assert_eq!(Protocol::from_tag("graphql"), None);
        assert!(Protocol::Wss.is_websocket());
        assert!(!Protocol::Grpc.is_websocket());
    }

    #[test]
    fn test_defaults() {
        let ctx = get("/");
        assert_eq!(ctx.status(), 404);
        assert!(!ctx.is_status_explicit());
        assert_eq!(ctx.message(), "Not Found");
        assert!(ctx.body().is_empty());
        assert_eq!(ctx.encoding(), "utf-8");
        assert!(ctx.request_id().is_none());
    }

    #[test]
    fn test_message_follows_status() {
        let mut ctx = get("/");
        ctx.set_status(503);
        assert_eq!(ctx.message(), "Service Unavailable");
        ctx.set_message("draining");
        assert_eq!(ctx.message(), "draining");
    }

    #[test]
    fn test_multi_valued_query() {
        let ctx = get("/search?requestId=a&x=1&requestId=b");
        assert_eq!(ctx.query("requestId"), vec!["a", "b"]);
        assert!(ctx.query("missing").is_empty());
    }

    #[test]
    fn test_end_is_single_write() {
        let mut ctx = get("/");
        ctx.response_headers_mut()
            .insert("x-request-id", HeaderValue::from_static("abc"));
        ctx.end(StatusCode::OK, response::full("one")).unwrap();
        let err = ctx.end(StatusCode::OK, response::full("two")).unwrap_err();
        assert!(matches!(err, ResponseError::AlreadySent));
        assert!(ctx.is_responded());

        let response = ctx.take_response().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "abc");
    }

    #[tokio::test]
    async fn test_rpc_reply_is_single_shot() {
        let (mut ctx, rx) = Context::grpc("/pkg.Svc/Call", HeaderMap::new(), serde_json::json!({}));
        ctx.response_headers_mut()
            .insert("requestid", HeaderValue::from_static("r-1"));
        ctx.rpc_reply(Ok(Body::from("done"))).unwrap();
        assert!(matches!(
            ctx.rpc_reply(Err(RpcStatus::new(GrpcCode::Unknown, "late"))),
            Err(ResponseError::AlreadySent)
        ));

        let reply = rx.await.unwrap();
        assert_eq!(reply.metadata["requestid"], "r-1");
        assert_eq!(reply.result.unwrap().inspect(), "done");
    }

    #[tokio::test]
    async fn test_ws_send() {
        let request = http::Request::get("wss://example.com/chat").body(()).unwrap();
        let (mut ctx, mut rx) = Context::websocket(&request);
        assert_eq!(ctx.protocol(), Protocol::Wss);
        ctx.ws_send("hello".to_string()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn test_transport_mismatch() {
        let mut ctx = get("/");
        assert!(matches!(
            ctx.ws_send("x".to_string()),
            Err(ResponseError::Unsupported(Protocol::Http))
        ));
    }
}
