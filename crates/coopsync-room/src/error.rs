//! Error types for the room layer.
//!
//! The `Display` text of the join/start errors is what participants see, so
//! it is kept in plain words.

use coopsync_protocol::{ParticipantId, RoomCode};

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// A host asked for a code that is already taken.
    #[error("Room already exists")]
    AlreadyExists(RoomCode),

    /// No room under that code. Empty when the join carried no code.
    #[error("Room '{0}' not found")]
    NotFound(String),

    /// Every seat is taken.
    #[error("Room is full (max {max} players)")]
    RoomFull { room_id: RoomCode, max: usize },

    /// A host-only action from someone else.
    #[error("Only host can start the game")]
    NotHost(ParticipantId),

    /// The participant already belongs to a room.
    #[error("participant {0} is already in room {1}")]
    AlreadyInRoom(ParticipantId, RoomCode),

    /// The participant does not belong to any room.
    #[error("participant {0} is not in a room")]
    NotInRoom(ParticipantId),

    /// The room's actor has stopped or its queue is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomCode),
}
