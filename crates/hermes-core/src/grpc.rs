//! gRPC status codes and the HTTP status mapping table.

use std::fmt;

/// Canonical gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GrpcCode {
    /// Not an error.
    Ok = 0,
    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request lacks valid authentication credentials.
    Unauthenticated = 16,
}

impl GrpcCode {
    /// Maps an HTTP-style status onto the closest gRPC code.
    ///
    /// Statuses below 400 map to [`GrpcCode::Ok`]; unlisted error statuses
    /// map to [`GrpcCode::Unknown`].
    #[must_use]
    pub const fn from_http_status(status: u16) -> Self {
        match status {
            0..=399 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            405 | 501 => Self::Unimplemented,
            408 | 504 => Self::DeadlineExceeded,
            409 => Self::AlreadyExists,
            412 => Self::FailedPrecondition,
            416 => Self::OutOfRange,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            500 => Self::Internal,
            503 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    /// Returns the numeric wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns the canonical human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "The operation completed successfully",
            Self::Cancelled => "The operation was cancelled",
            Self::Unknown => "Unknown error",
            Self::InvalidArgument => "Client specified an invalid argument",
            Self::DeadlineExceeded => "Deadline expired before operation could complete",
            Self::NotFound => "Some requested entity was not found",
            Self::AlreadyExists => "Some entity that we attempted to create already exists",
            Self::PermissionDenied => "The caller does not have permission to execute the specified operation",
            Self::ResourceExhausted => "Some resource has been exhausted",
            Self::FailedPrecondition => "The system is not in a state required for the operation's execution",
            Self::Aborted => "The operation was aborted",
            Self::OutOfRange => "Operation was attempted past the valid range",
            Self::Unimplemented => "Operation is not implemented or not supported",
            Self::Internal => "Internal error",
            Self::Unavailable => "The service is currently unavailable",
            Self::DataLoss => "Unrecoverable data loss or corruption",
            Self::Unauthenticated => "The request does not have valid authentication credentials",
        }
    }
}

impl fmt::Display for GrpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// A terminal gRPC error status delivered through the call callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    /// The gRPC status code.
    pub code: GrpcCode,
    /// The status details message.
    pub message: String,
}

impl RpcStatus {
    /// Creates a new status.
    pub fn new(code: GrpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code.as_i32(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(GrpcCode::from_http_status(200), GrpcCode::Ok);
        assert_eq!(GrpcCode::from_http_status(400), GrpcCode::InvalidArgument);
        assert_eq!(GrpcCode::from_http_status(401), GrpcCode::Unauthenticated);
        assert_eq!(GrpcCode::from_http_status(403), GrpcCode::PermissionDenied);
        assert_eq!(GrpcCode::from_http_status(404), GrpcCode::NotFound);
        assert_eq!(GrpcCode::from_http_status(408), GrpcCode::DeadlineExceeded);
        assert_eq!(GrpcCode::from_http_status(500), GrpcCode::Internal);
        assert_eq!(GrpcCode::from_http_status(503), GrpcCode::Unavailable);
    }

    #[test]
    fn test_unlisted_error_is_unknown() {
        assert_eq!(GrpcCode::from_http_status(418), GrpcCode::Unknown);
        assert_eq!(GrpcCode::from_http_status(599), GrpcCode::Unknown);
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(GrpcCode::PermissionDenied.as_i32(), 7);
        assert_eq!(GrpcCode::DeadlineExceeded.as_i32(), 4);
        assert_eq!(GrpcCode::Unauthenticated.as_i32(), 16);
    }
}
