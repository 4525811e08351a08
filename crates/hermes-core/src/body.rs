//! Response body model shared by every transport.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::fmt;

/// A boxed stream of body chunks, passed through to the wire untouched.
pub type BodyStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// The body a downstream handler produced, before wire rendering.
///
/// HTTP renders each variant natively (text and bytes as-is, JSON
/// serialized, streams piped); gRPC hands the value to the call
/// callback; WebSocket sends its [`inspect`](Body::inspect) form.
#[derive(Default)]
pub enum Body {
    /// No body was produced.
    #[default]
    Empty,
    /// A UTF-8 text payload.
    Text(String),
    /// A raw binary payload.
    Bytes(Bytes),
    /// A structured payload serialized as JSON on the wire.
    Json(serde_json::Value),
    /// A streaming payload of unknown length.
    Stream(BodyStream),
}

impl Body {
    /// Serializes `value` into a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Returns `true` when the body carries nothing worth sending.
    ///
    /// Empty strings, empty byte buffers and JSON `null` count as empty.
    /// Streams are never considered empty since their length is unknown.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Json(value) => value.is_null(),
            Self::Stream(_) => false,
        }
    }

    /// Returns `true` if this is a streaming body.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Moves the body out, leaving [`Body::Empty`] in its place.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Returns a printable representation used for socket frames and logs.
    #[must_use]
    pub fn inspect(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Self::Json(value) => value.to_string(),
            Self::Stream(_) => "[stream]".to_string(),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}
