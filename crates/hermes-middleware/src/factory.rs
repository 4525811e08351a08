//! Protocol handler registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hermes_core::Protocol;

use crate::handler::{GrpcAdapter, HttpAdapter, Lifecycle, ProtocolHandler, WsAdapter};

/// Maps each transport to its handler.
///
/// Populated once at startup and read-only afterwards. `wss` shares the
/// WebSocket handler, and unknown protocol tags resolve to HTTP.
pub struct HandlerRegistry {
    handlers: HashMap<Protocol, Arc<dyn ProtocolHandler>>,
    fallback: Arc<dyn ProtocolHandler>,
}

impl HandlerRegistry {
    /// Creates the registry with the HTTP, gRPC and WebSocket handlers.
    #[must_use]
    pub fn new() -> Self {
        let http: Arc<dyn ProtocolHandler> = Arc::new(Lifecycle::new(HttpAdapter));
        let mut handlers: HashMap<Protocol, Arc<dyn ProtocolHandler>> = HashMap::new();
        handlers.insert(Protocol::Http, Arc::clone(&http));
        handlers.insert(Protocol::Grpc, Arc::new(Lifecycle::new(GrpcAdapter)));
        handlers.insert(Protocol::Ws, Arc::new(Lifecycle::new(WsAdapter)));
        Self {
            handlers,
            fallback: http,
        }
    }

    /// Returns the handler for `protocol`.
    #[must_use]
    pub fn get(&self, protocol: Protocol) -> Arc<dyn ProtocolHandler> {
        let key = if protocol.is_websocket() {
            Protocol::Ws
        } else {
            protocol
        };
        self.handlers
            .get(&key)
            .map_or_else(|| Arc::clone(&self.fallback), Arc::clone)
    }

    /// Returns the handler for a protocol tag such as `"grpc"`.
    ///
    /// Unrecognized tags get the HTTP handler.
    #[must_use]
    pub fn get_by_tag(&self, tag: &str) -> Arc<dyn ProtocolHandler> {
        match Protocol::from_tag(tag) {
            Some(protocol) => self.get(protocol),
            None => {
                tracing::debug!(tag, "unknown protocol tag, using the HTTP handler");
                Arc::clone(&self.fallback)
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("protocols", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_protocol() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.get(Protocol::Http).protocol(), Protocol::Http);
        assert_eq!(registry.get(Protocol::Grpc).protocol(), Protocol::Grpc);
        assert_eq!(registry.get(Protocol::Ws).protocol(), Protocol::Ws);
        assert_eq!(registry.get(Protocol::Wss).protocol(), Protocol::Ws);
    }

    #[test]
    fn test_handlers_are_singletons() {
        let registry = HandlerRegistry::new();
        assert!(Arc::ptr_eq(
            &registry.get(Protocol::Grpc),
            &registry.get_by_tag("GRPC")
        ));
    }

    #[test]
    fn test_unknown_tag_falls_back_to_http() {
        let registry = HandlerRegistry::default();
        assert_eq!(registry.get_by_tag("mqtt").protocol(), Protocol::Http);
        assert_eq!(registry.get_by_tag("https").protocol(), Protocol::Http);
    }
}
