//! # Hermes Middleware
//!
//! Cross-protocol request tracing and error normalization.
//!
//! One middleware, [`TraceMiddleware`], fronts HTTP, gRPC and WebSocket
//! requests alike. It assigns the request id, starts the trace span and
//! hands the request to the protocol handler for its transport, which runs
//! the rest of the chain against a deadline and renders whatever comes out
//! of it: a body, a prevented request, or an error.
//!
//! ## Request Lifecycle
//!
//! ```text
//! Request → Trace ─► PRE ─► RACE(downstream, timeout) ─► OUTCOME ─► POST
//!                                                          │
//!                                  success ◄───────────────┤
//!                                  prevented ◄─────────────┤
//!                                  error → catcher ◄───────┘
//! ```
//!
//! | Transport | Success                 | Deadline          | Errors                      |
//! |-----------|-------------------------|-------------------|-----------------------------|
//! | HTTP      | buffered/streamed body  | 408               | JSON, HTML or text payload  |
//! | gRPC      | reply callback          | `DEADLINE_EXCEEDED` | status mapped to gRPC code |
//! | WebSocket | text frame              | 408               | JSON payload frame          |
//!
//! ## Example
//!
//! ```
//! use hermes_core::{BoxFuture, Context};
//! use hermes_middleware::{HandlerResult, Pipeline, TraceMiddleware};
//! use hermes_config::TraceOptions;
//!
//! fn hello(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
//!     Box::pin(async { Ok(Some("hello".into())) })
//! }
//!
//! let pipeline = Pipeline::builder()
//!     .stage(TraceMiddleware::new(TraceOptions::default()))
//!     .build(hello);
//! assert_eq!(pipeline.stage_names(), vec!["trace"]);
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod catcher;
pub mod compression;
mod drain;
mod extension;
pub mod factory;
pub mod handler;
pub mod middleware;
pub mod pipeline;
pub mod request_id;
pub mod respond;
pub mod trace;

// Re-export main types at crate root
pub use drain::{DrainHandle, DRAINING_MESSAGE};
pub use extension::ExtensionOptions;
pub use factory::HandlerRegistry;
pub use handler::{Lifecycle, ProtocolHandler, TransportAdapter};
pub use hermes_core::BoxFuture;
pub use middleware::{Handler, HandlerResult, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use request_id::IdFactory;
pub use trace::{TraceMiddleware, TraceMiddlewareBuilder};
