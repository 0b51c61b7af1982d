//! Room configuration and lifecycle state.

use std::time::Duration;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings shared by every room the relay spawns.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Members allowed in a room, host included.
    pub max_players: usize,

    /// `gameState` fan-out rate in Hz. 0 disables periodic snapshots.
    pub snapshot_rate_hz: u32,

    /// Upper bound on the random delay before a room's first snapshot, so
    /// rooms created together do not tick in lockstep.
    pub initial_jitter: Duration,

    /// Capacity of each room actor's command queue.
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 6,
            snapshot_rate_hz: 30,
            initial_jitter: Duration::from_millis(2),
            command_buffer: 64,
        }
    }
}

impl RoomConfig {
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    pub fn with_snapshot_rate(mut self, hz: u32) -> Self {
        self.snapshot_rate_hz = hz;
        self
    }

    pub fn with_initial_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Pending ──(host starts game)──→ Active
///    │                              │
///    └────(host leaves / shutdown)──┴──→ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Created by the host, waiting for the game to start. Joinable.
    Pending,
    /// Game running. Still joinable: late joiners receive the next snapshot.
    Active,
    /// Torn down. Terminal.
    Closed,
}

impl RoomState {
    /// Returns `true` if the room admits new members.
    pub fn is_joinable(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Active) | (Self::Pending, Self::Closed) | (Self::Active, Self::Closed)
        )
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
