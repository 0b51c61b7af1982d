//! Participant engine for coopsync.
//!
//! Everything a host or client needs between the socket and the game:
//!
//! - [`Session`]: join/confirm/error lifecycle, message routing, host actions
//! - [`SyncRegistry`]: label-keyed entity synchronizers
//! - [`PlayerReconciler`]: remote avatars kept in line with snapshots
//! - [`HostBroadcaster`] and [`StartRebroadcast`]: outbound assembly
//! - [`KeyEdges`]: key press/release reporting
//! - [`ClientDriver`]: the `tokio::select!` loop that runs it all
//!
//! The game plugs in through the [`Simulation`] and [`Lobby`] traits.

mod broadcaster;
mod collab;
mod driver;
mod error;
mod input;
mod reconciler;
mod registry;
mod roster;
mod session;

pub use broadcaster::{HostBroadcaster, StartRebroadcast};
pub use collab::{Lobby, NullLobby, Simulation, player_count_label};
pub use driver::{ClientDriver, DriverHandle};
pub use error::{ClientError, SyncError};
pub use input::{DEFAULT_CONTROLS, KeyEdges};
pub use reconciler::{
    DEFAULT_PALETTE, PlayerReconciler, ReconcileReport, ReconcilerConfig, RemotePlayer, lerp,
};
pub use registry::{ApplyReport, SyncRegistry};
pub use roster::Roster;
pub use session::{Effect, Session, SessionConfig, SessionState};
