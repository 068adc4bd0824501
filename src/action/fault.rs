//! Setup-time and request-time error types.

use std::error::Error;
use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;

use crate::streaming::BoxError;

/// Registration error. Fatal: raised before serving starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("action {action} already has a wrapper")]
    DuplicateWrapper { action: String },

    #[error("malformed route pattern {pattern:?}: {reason}")]
    MalformedRoute { pattern: String, reason: &'static str },

    #[error("route {method} {pattern} is bound to {action}, which has no handler")]
    MissingHandler {
        method: String,
        pattern: String,
        action: String,
    },
}

/// A failure raised by a hook or handler while serving a request.
///
/// Cloneable so every joiner of a coalesced call can observe the same fault.
#[derive(Debug, Clone, Error)]
pub enum HandlerFault {
    /// Renders as the given status; never fatal.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{0}")]
    Internal(Arc<dyn Error + Send + Sync>),
}

impl HandlerFault {
    pub fn internal(err: impl Into<BoxError>) -> Self {
        HandlerFault::Internal(Arc::from(err.into()))
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        HandlerFault::Status {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, message)
    }

    /// Status used when the fault is rendered without a fault callback.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerFault::Status { status, .. } => *status,
            HandlerFault::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            HandlerFault::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Only internal faults can bring the server down.
    pub fn is_internal(&self) -> bool {
        matches!(self, HandlerFault::Internal(_))
    }
}

impl From<serde_json::Error> for HandlerFault {
    fn from(err: serde_json::Error) -> Self {
        HandlerFault::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(HandlerFault::not_found("gone").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(HandlerFault::Cancelled.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(HandlerFault::internal("boom").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(HandlerFault::internal("boom").is_internal());
        assert!(!HandlerFault::bad_request("nope").is_internal());
    }

    #[test]
    fn test_clones_share_the_source() {
        let fault = HandlerFault::internal(std::io::Error::other("disk full"));
        let copy = fault.clone();
        match (&fault, &copy) {
            (HandlerFault::Internal(a), HandlerFault::Internal(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
        assert_eq!(copy.to_string(), "disk full");
    }
}
