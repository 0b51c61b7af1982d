//! Codec trait and the JSON implementation.
//!
//! Callers above this crate never touch `serde_json` directly; they hold a
//! [`Codec`] and move typed messages through it.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Converts typed messages to bytes and back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or do not
    /// match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that speaks JSON, the format browser peers expect.
///
/// ```rust
/// use coopsync_protocol::{ClientMessage, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&ClientMessage::StartGame).unwrap();
/// assert_eq!(bytes, br#"{"type":"startGame"}"#);
///
/// let decoded: ClientMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ClientMessage::StartGame);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
