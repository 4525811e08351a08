//! Error types for Hermes.
//!
//! [`HandlerError`] is what downstream handlers return; [`ResponseError`] is
//! what the response layer reports when a write cannot happen.

use crate::context::Protocol;
use crate::exception::Exception;
use thiserror::Error;

/// Result type returned by response-layer operations.
pub type ResponseResult<T> = Result<T, ResponseError>;

/// Errors raised while writing a response to the transport.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// A response was already written for this request.
    #[error("response already sent")]
    AlreadySent,

    /// The peer side of the response channel is gone.
    #[error("response channel closed")]
    ChannelClosed,

    /// The operation does not exist for this transport.
    #[error("operation not supported for protocol {0}")]
    Unsupported(Protocol),

    /// The HTTP response could not be assembled.
    #[error("failed to build response: {0}")]
    Build(#[from] http::Error),

    /// The body could not be serialized.
    #[error("failed to serialize body: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A custom error handler failed.
    #[error("error handler failed: {0}")]
    Handler(String),
}

/// Errors a downstream handler can return.
///
/// # Example
///
/// ```
/// use hermes_core::{Exception, HandlerError};
///
/// let err: HandlerError = Exception::new("forbidden").with_status(403).into();
/// assert!(matches!(err, HandlerError::Exception(_)));
///
/// let err: HandlerError = anyhow::anyhow!("boom").into();
/// assert_eq!(err.to_string(), "boom");
/// ```
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An intentional domain error carrying its own code and status.
    #[error("{0}")]
    Exception(Exception),

    /// Remaining processing was skipped on purpose; not a failure.
    #[error("request processing prevented")]
    Prevented,

    /// Any other failure. Always rendered as a 500.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Returns `true` for the prevented sentinel.
    #[must_use]
    pub const fn is_prevented(&self) -> bool {
        matches!(self, Self::Prevented)
    }

    /// Returns the server-side diagnostic trace for logging.
    ///
    /// Never sent to clients.
    #[must_use]
    pub fn stack(&self) -> Option<String> {
        match self {
            Self::Exception(exception) => exception.stack().map(str::to_string),
            Self::Prevented => None,
            Self::Other(err) => Some(format!("{err:?}")),
        }
    }
}

impl From<Exception> for HandlerError {
    fn from(exception: Exception) -> Self {
        Self::Exception(exception)
    }
}

/// Aborts downstream processing without it being treated as a failure.
///
/// # Example
///
/// ```
/// use hermes_core::prevent;
///
/// let result: Result<(), _> = prevent();
/// assert!(result.unwrap_err().is_prevented());
/// ```
pub fn prevent<T>() -> Result<T, HandlerError> {
    Err(HandlerError::Prevented)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_error_display() {
        assert_eq!(ResponseError::AlreadySent.to_string(), "response already sent");
        assert_eq!(
            ResponseError::Unsupported(Protocol::Grpc).to_string(),
            "operation not supported for protocol grpc"
        );
    }

    #[test]
    fn test_generic_error_stack_contains_context() {
        let err = anyhow::anyhow!("disk full").context("saving user");
        let err = HandlerError::from(err);
        assert_eq!(err.to_string(), "saving user");
        let stack = err.stack().unwrap();
        assert!(stack.contains("disk full"));
    }

    #[test]
    fn test_prevented_has_no_stack() {
        assert!(HandlerError::Prevented.stack().is_none());
        assert!(prevent::<()>().unwrap_err().is_prevented());
    }
}
