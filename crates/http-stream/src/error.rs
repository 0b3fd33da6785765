//! Error types for the streamable HTTP transport.

use crate::jsonrpc::{ErrorCode, ErrorObject, RequestId};
use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Configuration errors (invalid header names/values, inconsistent limits)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The registry already holds `maxConcurrentSessions` live sessions.
    #[error("Session capacity exceeded ({limit} concurrent sessions)")]
    CapacityExceeded { limit: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// GET/DELETE without the session header.
    #[error("Missing {0} header")]
    MissingSessionId(String),

    /// The client reused a request id that is still pending in its session.
    #[error("Duplicate request id {0}")]
    DuplicateRequestId(RequestId),

    /// Batch mode only: the dispatcher did not answer in time.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Session terminated")]
    SessionTerminated,

    #[error("Message exceeds the maximum size of {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// A disabled capability was invoked (e.g. client-side termination).
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// A double resolve or a resolve for an id that was never registered.
    ///
    /// Internal only: logged, never sent to a client.
    #[error("Unknown request {request_id} in session {session_id}")]
    UnknownRequest {
        session_id: String,
        request_id: RequestId,
    },

    /// The request body is not valid JSON-RPC.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl TransportError {
    /// HTTP status used when the error ends the exchange at transport level.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::SessionNotFound(_) | Self::SessionExpired(_) => StatusCode::NOT_FOUND,
            Self::MissingSessionId(_) | Self::Parse(_) | Self::DuplicateRequestId(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::SessionTerminated => StatusCode::GONE,
            Self::MessageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Config(_) | Self::UnknownRequest { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code for the error object sent to the client.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::PARSE_ERROR,
            Self::DuplicateRequestId(_) | Self::MissingSessionId(_) => ErrorCode::INVALID_REQUEST,
            Self::Timeout(_) => ErrorCode::REQUEST_TIMEOUT,
            Self::SessionTerminated => ErrorCode::SESSION_TERMINATED,
            Self::Forbidden(_) | Self::Unauthorized => ErrorCode::FORBIDDEN,
            Self::CapacityExceeded { .. } => ErrorCode::CAPACITY_EXCEEDED,
            Self::SessionNotFound(_) | Self::SessionExpired(_) => ErrorCode::SESSION_NOT_FOUND,
            Self::MessageTooLarge { .. } => ErrorCode::MESSAGE_TOO_LARGE,
            Self::Config(_) | Self::MethodNotAllowed(_) | Self::UnknownRequest { .. } => {
                ErrorCode::INTERNAL_ERROR
            }
        }
    }

    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string())
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::TransportError;
    use crate::jsonrpc::{ErrorCode, RequestId};
    use axum::http::StatusCode;

    #[test]
    fn session_level_failures_map_to_http_statuses() {
        assert_eq!(
            TransportError::CapacityExceeded { limit: 1 }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TransportError::SessionNotFound("s".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransportError::MessageTooLarge { limit: 8 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            TransportError::Forbidden("termination disabled").status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn request_level_failures_carry_jsonrpc_codes() {
        let dup = TransportError::DuplicateRequestId(RequestId::Number(7));
        assert_eq!(dup.code(), ErrorCode::INVALID_REQUEST);
        assert!(dup.to_error_object().message.contains('7'));
        assert_eq!(TransportError::Timeout(10).code(), ErrorCode::REQUEST_TIMEOUT);
        assert_eq!(
            TransportError::SessionTerminated.code(),
            ErrorCode::SESSION_TERMINATED
        );
    }
}
