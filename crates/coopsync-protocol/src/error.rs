//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The bytes were not a well-formed message: bad JSON, a missing
    /// `type`, or a known `type` with fields of the wrong shape.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The message parsed but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
