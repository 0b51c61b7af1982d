//! Collaborator seams: the simulation engine and the lobby UI.
//!
//! The engine never touches a physics world or a DOM directly. It calls
//! these traits, and the embedding application implements them.

use coopsync_protocol::{ParticipantId, PlayerState, RoomCode};

use crate::RemotePlayer;

/// The local simulation (physics, rendering, level flow).
pub trait Simulation {
    /// Whatever the simulation hands back for a spawned remote avatar.
    type Body;

    /// Spawns a network-owned avatar for `id`.
    fn add_remote_player(&mut self, id: &ParticipantId, color: &str) -> Self::Body;

    /// Pushes the reconciled view of a remote player into its avatar.
    fn update_remote_player(&mut self, body: &mut Self::Body, player: &RemotePlayer);

    /// Releases an avatar and everything it holds.
    fn remove_proxy(&mut self, body: Self::Body);

    /// State of the locally controlled player for this tick.
    fn local_player_state(&self) -> PlayerState;

    /// Begins the shared simulation loop.
    fn start(&mut self);

    fn is_running(&self) -> bool;

    /// Transitions to the named level.
    fn transition_to_level(&mut self, level: &str);

    fn restart_current_level(&mut self);
}

/// The pre-game lobby UI.
pub trait Lobby {
    fn set_room_code(&mut self, code: &RoomCode);

    /// Shows how many participants are in the room.
    fn show_player_count(&mut self, count: usize);

    /// Adds a name to the visible member list.
    fn append_roster_entry(&mut self, name: &str);

    /// Blocking notification of a fatal session error, shown verbatim.
    fn show_error(&mut self, message: &str);

    /// Persistent status once reconnection has given up.
    fn show_disconnected(&mut self);
}

/// A [`Lobby`] that shows nothing. For headless participants and bots.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLobby;

impl Lobby for NullLobby {
    fn set_room_code(&mut self, _code: &RoomCode) {}
    fn show_player_count(&mut self, _count: usize) {}
    fn append_roster_entry(&mut self, _name: &str) {}
    fn show_error(&mut self, _message: &str) {}
    fn show_disconnected(&mut self) {}
}

/// Text a lobby shows for a member count.
pub fn player_count_label(count: usize) -> String {
    format!("Players: {count}")
}
