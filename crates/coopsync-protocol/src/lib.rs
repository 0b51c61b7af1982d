//! Wire protocol for coopsync.
//!
//! The vocabulary both sides of a session speak:
//!
//! - **Types**: [`ClientMessage`] (participant → relay), [`ServerMessage`]
//!   (relay → participant), the [`PlayerState`] record and its partial
//!   [`PlayerUpdate`], [`HostCommand`], and [`SyncBundle`].
//! - **Codec**: [`Codec`] with the [`JsonCodec`] implementation.
//! - **Errors**: [`ProtocolError`].
//!
//! The crate knows nothing about sockets or rooms.
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Room (relay) / Session (participant)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ClientMessage, HostCommand, ParticipantId, PlayerState, PlayerUpdate, Position, Role,
    RoomCode, ServerMessage, SyncBundle,
};
