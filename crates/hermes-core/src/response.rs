//! HTTP response types.

use crate::body::BodyStream;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;

/// Body type for every HTTP response Hermes writes.
///
/// Unsync so that streaming bodies only need to be `Send`.
pub type ResponseBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// HTTP response type written into the [`Context`](crate::Context).
pub type Response = http::Response<ResponseBody>;

/// Creates a buffered response body.
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Creates an empty response body.
pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Wraps a chunk stream as a response body.
pub fn streaming(stream: BodyStream) -> ResponseBody {
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

