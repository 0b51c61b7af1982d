//! # Coopsync
//!
//! Real-time state synchronization for small host/client co-op sessions.
//!
//! A host opens a room on the relay, up to five clients join it by code, and
//! the relay fans out a merged snapshot of every avatar at a fixed rate. The
//! host drives shared game events (start, level changes, restarts) and
//! publishes labeled world state that clients apply.
//!
//! The crates split along those lines:
//! - `coopsync-transport`: WebSocket listener plus a reconnecting client
//! - `coopsync-protocol`: wire messages and the JSON codec
//! - `coopsync-room`: room actors, the room directory, and snapshot pacing
//! - `coopsync-client`: the participant engine that mirrors remote players
//! - `coopsync` (this crate): the relay server and the `coopsync-relay` binary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coopsync::prelude::*;
//!
//! # async fn start() -> Result<(), CoopsyncError> {
//! let server = RelayServer::builder().bind("0.0.0.0:8765").build().await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{ENV_BIND, ENV_MAX_PLAYERS, ENV_SNAPSHOT_HZ, RelayConfig};
pub use error::CoopsyncError;
pub use server::{RelayServer, RelayServerBuilder};

/// Everything needed to run a relay or a participant.
pub mod prelude {
    pub use crate::{CoopsyncError, RelayConfig, RelayServer, RelayServerBuilder};

    pub use coopsync_client::{
        ClientDriver, ClientError, DriverHandle, Lobby, NullLobby, RemotePlayer, Session,
        SessionConfig, SessionState, Simulation, SyncError, SyncRegistry,
    };
    pub use coopsync_protocol::{
        ClientMessage, Codec, HostCommand, JsonCodec, ParticipantId, PlayerState, PlayerUpdate,
        Position, ProtocolError, Role, RoomCode, ServerMessage, SyncBundle,
    };
    pub use coopsync_room::{RoomConfig, RoomDirectory, RoomError};
    pub use coopsync_transport::{ClientConfig, TransportError, TransportEvent};
}
