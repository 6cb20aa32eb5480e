//! Error taxonomy for calls made to the companion service and the sync API.

use thiserror::Error;

/// Classified failure of a single outbound call.
///
/// The variants are deliberately coarse: callers branch on the kind of
/// failure (timeout vs. refused connection vs. a structured rejection), not on
/// the exact transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompanionError {
    /// The timeout elapsed before a response arrived.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The caller fired the abort token before a response arrived.
    #[error("request was aborted")]
    Aborted,

    /// Connection refused, reset, or otherwise unreachable.
    #[error("network failure: {message}")]
    Network { message: String },

    /// Non-2xx response carrying a message from the remote side.
    #[error("HTTP {status}: {message}")]
    Protocol { status: u16, message: String },

    /// The response body could not be parsed.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// A sync job is already running on the server.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Invalid input rejected before any network call.
    #[error("invalid input: {message}")]
    UserInput { message: String },
}

impl CompanionError {
    /// Create a network failure error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create a protocol error for a non-2xx status.
    pub fn protocol(status: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            message: message.into(),
        }
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Create a user input error.
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput { message: message.into() }
    }

    /// Whether the call ended because of a timeout or an abort.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Aborted)
    }

    /// Whether the call never produced a response from the remote side.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Aborted | Self::Network { .. })
    }
}
