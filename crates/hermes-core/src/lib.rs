//! # Hermes Core
//!
//! Core types shared by every Hermes crate.
//!
//! - [`Context`] - Per-request state for HTTP, gRPC and WebSocket requests
//! - [`Body`] - Response body produced by downstream handlers
//! - [`Exception`] - Uniform, protocol-aware application error
//! - [`HandlerError`] - What downstream handlers return on failure
//! - [`GrpcCode`] - gRPC status codes and the HTTP status mapping
//! - [`render`] - Protocol-default exception renderers

#![doc(html_root_url = "https://docs.rs/hermes-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod body;
mod context;
mod error;
mod exception;
mod grpc;
pub mod render;
pub mod response;

pub use body::{Body, BodyStream};
pub use context::{Context, Protocol, RpcReply};
pub use error::{prevent, HandlerError, ResponseError, ResponseResult};
pub use exception::{BoxFuture, ErrorHandler, Exception, SpanRef};
pub use grpc::{GrpcCode, RpcStatus};
pub use response::{Response, ResponseBody};
