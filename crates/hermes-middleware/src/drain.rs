//! Server draining flag.
//!
//! Once draining starts, every new request is answered with a 503 without
//! reaching downstream handlers.
//!
//! ```
//! use hermes_middleware::DrainHandle;
//!
//! let drain = DrainHandle::new();
//! let server_side = drain.clone();
//!
//! assert!(!drain.is_draining());
//! server_side.start_draining();
//! assert!(drain.is_draining());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Message sent with draining responses.
pub const DRAINING_MESSAGE: &str = "Server is in the process of shutting down";

/// A cloneable draining flag shared between the server and the trace
/// middleware.
#[derive(Debug, Clone, Default)]
pub struct DrainHandle {
    draining: Arc<AtomicBool>,
}

impl DrainHandle {
    /// Creates a handle that is not draining.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts draining. Idempotent.
    pub fn start_draining(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            tracing::info!("draining started, new requests will be rejected");
        }
    }

    /// Returns `true` once draining started.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}
