//! Error types for chat sessions.
//!
//! Setup errors (`KeyGeneration`, `Bind`, `AddressParse`, `Connection`) are
//! fatal for the process. The remaining variants end only the task that hit
//! them.

use protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while bootstrapping or running a chat session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The entropy source could not produce a key.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A destination address string could not be parsed.
    #[error("invalid peer address {input:?}: {reason}")]
    AddressParse {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The local endpoint could not be bound.
    #[error("failed to bind endpoint: {0}")]
    Bind(String),

    /// The peer is unreachable, refused the sub-protocol, or timed out.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Reading from the session failed.
    #[error("transport read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    /// Queueing bytes on the session failed.
    #[error("transport write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// Submitting queued bytes failed.
    #[error("transport flush failed: {0}")]
    TransportFlush(#[source] std::io::Error),

    /// A received frame is not a valid message envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Rendering to the local terminal failed.
    #[error("terminal output failed: {0}")]
    Terminal(#[source] std::io::Error),

    /// Any other protocol-level failure.
    #[error(transparent)]
    Protocol(ProtocolError),
}

/// Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    /// Builds an [`ChatError::AddressParse`] for `input`.
    pub(crate) fn address(input: &str, reason: impl Into<String>) -> Self {
        ChatError::AddressParse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ProtocolError> for ChatError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MalformedEnvelope(msg) => ChatError::MalformedEnvelope(msg),
            ProtocolError::ProtocolRejected { .. } | ProtocolError::NegotiationFailed(_) => {
                ChatError::Connection(err.to_string())
            }
            other => ChatError::Protocol(other),
        }
    }
}
