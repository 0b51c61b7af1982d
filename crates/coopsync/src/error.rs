//! Unified error type for coopsync.

use coopsync_client::{ClientError, SyncError};
use coopsync_protocol::ProtocolError;
use coopsync_room::RoomError;
use coopsync_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum CoopsyncError {
    /// Connection, send, recv, or bind failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode, or invalid message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Room full, not found, host-only action, and the like.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Participant engine failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Bad relay configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
