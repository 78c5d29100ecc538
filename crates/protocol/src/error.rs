//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize a message envelope.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Received bytes are not a valid message envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    // Frame errors
    /// A frame payload contains a raw record delimiter.
    #[error("frame payload contains a raw delimiter at offset {offset}")]
    DelimiterInPayload {
        /// Byte offset of the first delimiter in the payload.
        offset: usize,
    },

    // Negotiation errors
    /// The remote peer does not speak the proposed sub-protocol.
    #[error("protocol rejected by peer: {protocol}")]
    ProtocolRejected {
        /// The sub-protocol identifier that was proposed.
        protocol: String,
    },

    /// The negotiation exchange did not follow the expected shape.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::MalformedEnvelope(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
