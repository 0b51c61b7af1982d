//! Outbound message assembly.
//!
//! [`HostBroadcaster`] turns local state into wire messages each tick and
//! guards the host-only ones. [`StartRebroadcast`] re-sends the start
//! command on a schedule so clients that joined late, or missed the first
//! one, still start.

use std::time::Duration;

use coopsync_protocol::{ClientMessage, HostCommand, PlayerState, Role};
use tracing::debug;

use crate::{ClientError, SyncRegistry};

/// Builds outgoing messages for one participant.
#[derive(Debug, Clone, Copy)]
pub struct HostBroadcaster {
    role: Role,
}

impl HostBroadcaster {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// The per-tick `player` message for the local avatar. Both roles send it.
    pub fn assemble_outgoing_player_state(&self, local: PlayerState) -> ClientMessage {
        ClientMessage::Player { player: local.into() }
    }

    /// Wraps a host command for relay to every client.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotHost`] when called on a client.
    pub fn broadcast_command(&self, command: HostCommand) -> Result<ClientMessage, ClientError> {
        if !self.is_host() {
            return Err(ClientError::NotHost("broadcast"));
        }
        if command.is_empty() {
            debug!("broadcasting empty host command");
        }
        Ok(ClientMessage::Broadcast { payload: command })
    }

    /// Collects every registered entity kind into a `sync` message.
    ///
    /// Returns `Ok(None)` when nothing is registered.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotHost`] when called on a client.
    pub fn assemble_sync<W>(&self, registry: &SyncRegistry<W>, world: &W) -> Result<Option<ClientMessage>, ClientError> {
        if !self.is_host() {
            return Err(ClientError::NotHost("send sync bundles"));
        }
        if registry.is_empty() {
            return Ok(None);
        }
        Ok(Some(ClientMessage::Sync {
            bundle: registry.collect_outgoing(world),
        }))
    }
}

/// Bounded re-send schedule for the start command.
///
/// ```text
/// start() ── interval ──→ tick #1 ── interval ──→ ... tick #max ──→ exhausted
/// ```
#[derive(Debug, Clone)]
pub struct StartRebroadcast {
    interval: Duration,
    max_count: u32,
    sent: u32,
    active: bool,
}

impl StartRebroadcast {
    /// Default re-send interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
    /// Default number of re-sends.
    pub const DEFAULT_MAX_COUNT: u32 = 20;

    pub fn new(interval: Duration, max_count: u32) -> Self {
        Self {
            interval,
            max_count,
            sent: 0,
            active: false,
        }
    }

    /// Arms the schedule and resets the counter.
    pub fn start(&mut self) {
        self.sent = 0;
        self.active = self.max_count > 0;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Called once per interval. Returns the message to send, or `None`
    /// once stopped or exhausted.
    pub fn tick(&mut self) -> Option<ClientMessage> {
        if !self.active {
            return None;
        }
        self.sent += 1;
        if self.sent >= self.max_count {
            self.active = false;
        }
        debug!(sent = self.sent, max = self.max_count, "re-broadcasting start");
        Some(ClientMessage::Broadcast {
            payload: HostCommand::start_game(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for StartRebroadcast {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, Self::DEFAULT_MAX_COUNT)
    }
}
