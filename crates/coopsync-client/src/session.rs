//! Participant session state machine.
//!
//! ```text
//! Disconnected ──begin──→ Joining ──roomCreated──→ Active(host)
//!                            │     ──joinedRoom───→ Active(client)
//!                            │                          │
//!                            └──────── error ───────────┴──→ Closed
//! ```
//!
//! [`Session`] is sans-IO: it consumes [`ServerMessage`]s and
//! [`TransportEvent`]s and returns [`Effect`]s for the driver to carry out.
//! It owns the roster, the sync registry and the player reconciler, and talks
//! to the simulation and lobby through their traits.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use coopsync_protocol::{
    ClientMessage, Codec, HostCommand, JsonCodec, ParticipantId, PlayerState, Role, RoomCode,
    ServerMessage, SyncBundle,
};
use coopsync_transport::TransportEvent;
use tracing::{debug, info, warn};

use crate::{
    ClientError, HostBroadcaster, KeyEdges, Lobby, PlayerReconciler, ReconcilerConfig, Roster,
    Simulation, StartRebroadcast, SyncRegistry,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    /// Code to create (host) or enter (client). A host without one gets a
    /// generated code.
    pub room: Option<RoomCode>,
    pub username: Option<String>,
    /// Re-send the join after the transport reconnects.
    pub rejoin_on_reconnect: bool,
    /// Interval between outbound player/sync ticks.
    pub tick_interval: Duration,
    pub rebroadcast_interval: Duration,
    /// Re-sends of the start command after the game starts.
    pub max_rebroadcasts: u32,
    pub reconciler: ReconcilerConfig,
}

impl SessionConfig {
    /// A host session, optionally asking for a specific room code.
    pub fn host(room: Option<RoomCode>) -> Self {
        Self {
            role: Role::Host,
            room,
            ..Self::default()
        }
    }

    /// A client session entering `room`.
    pub fn client(room: RoomCode) -> Self {
        Self {
            role: Role::Client,
            room: Some(room),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_rejoin_on_reconnect(mut self, rejoin: bool) -> Self {
        self.rejoin_on_reconnect = rejoin;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_rebroadcast(mut self, interval: Duration, max_count: u32) -> Self {
        self.rebroadcast_interval = interval;
        self.max_rebroadcasts = max_count;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            room: None,
            username: None,
            rejoin_on_reconnect: true,
            tick_interval: Duration::from_millis(33),
            rebroadcast_interval: StartRebroadcast::DEFAULT_INTERVAL,
            max_rebroadcasts: StartRebroadcast::DEFAULT_MAX_COUNT,
            reconciler: ReconcilerConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// State and effects
// ---------------------------------------------------------------------------

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Join sent, waiting for the relay's confirmation.
    Joining,
    Active { role: Role, room: RoomCode },
    /// Terminal until a fresh session is started.
    Closed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Joining => write!(f, "joining"),
            Self::Active { role, room } => write!(f, "active({role}, {room})"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Something the driver must do on the session's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(ClientMessage),
    CloseTransport,
    /// Arm the start re-broadcast timer.
    StartRebroadcast,
    /// Cancel the start re-broadcast timer.
    StopRebroadcast,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One participant's view of a room.
pub struct Session<S: Simulation, L: Lobby> {
    config: SessionConfig,
    state: SessionState,
    player_id: Option<ParticipantId>,
    player_count: usize,
    sim: S,
    lobby: L,
    roster: Roster,
    registry: SyncRegistry<S>,
    reconciler: PlayerReconciler<S::Body>,
    broadcaster: HostBroadcaster,
    rebroadcast: StartRebroadcast,
    key_edges: KeyEdges,
    codec: JsonCodec,
}

impl<S: Simulation, L: Lobby> Session<S, L> {
    pub fn new(config: SessionConfig, sim: S, lobby: L) -> Self {
        Self {
            state: SessionState::Disconnected,
            player_id: None,
            player_count: 0,
            sim,
            lobby,
            roster: Roster::new(),
            registry: SyncRegistry::new(),
            reconciler: PlayerReconciler::new(config.reconciler.clone()),
            broadcaster: HostBroadcaster::new(config.role),
            rebroadcast: StartRebroadcast::new(config.rebroadcast_interval, config.max_rebroadcasts),
            key_edges: KeyEdges::default(),
            codec: JsonCodec,
            config,
        }
    }

    // -- Lifecycle --------------------------------------------------------

    /// Sends the join request.
    pub fn begin(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            warn!("session closed, not joining");
            return Vec::new();
        }
        self.state = SessionState::Joining;
        info!(role = %self.config.role, room = ?self.config.room, "joining");
        vec![Effect::Send(ClientMessage::Join {
            role: self.config.role,
            room_id: self.config.room.clone(),
            username: self.config.username.clone(),
        })]
    }

    /// Feeds one transport event in.
    pub fn on_transport(&mut self, event: TransportEvent) -> Vec<Effect> {
        match event {
            TransportEvent::Opened { reconnected: false } => match self.state {
                SessionState::Disconnected => self.begin(),
                _ => Vec::new(),
            },
            TransportEvent::Opened { reconnected: true } => self.on_reconnected(),
            TransportEvent::Message(bytes) => match self.codec.decode::<ServerMessage>(&bytes) {
                Ok(msg) => self.handle(msg),
                Err(e) => {
                    warn!(error = %e, len = bytes.len(), "dropping malformed relay message");
                    Vec::new()
                }
            },
            TransportEvent::Closed => {
                warn!(state = %self.state, "connection lost");
                Vec::new()
            }
            TransportEvent::Reconnecting { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                Vec::new()
            }
            TransportEvent::Disconnected => self.on_disconnected(),
        }
    }

    /// The transport came back after a drop.
    ///
    /// The relay has forgotten us, so proxies and roster are rebuilt from a
    /// fresh join, or the session closes if rejoining is off.
    pub fn on_reconnected(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return vec![Effect::CloseTransport];
        }
        self.reset_room_view();
        if self.config.rejoin_on_reconnect {
            // A host gets its own code back so clients can find it again.
            if let SessionState::Active { room, .. } = &self.state {
                self.config.room = Some(room.clone());
            }
            info!("reconnected, rejoining");
            let mut effects = vec![Effect::StopRebroadcast];
            self.state = SessionState::Disconnected;
            effects.extend(self.begin());
            effects
        } else {
            info!("reconnected, rejoin disabled");
            self.state = SessionState::Closed;
            vec![Effect::StopRebroadcast, Effect::CloseTransport]
        }
    }

    /// Reconnection gave up.
    pub fn on_disconnected(&mut self) -> Vec<Effect> {
        warn!("relay unreachable, session closed");
        self.lobby.show_disconnected();
        self.reset_room_view();
        self.state = SessionState::Closed;
        vec![Effect::StopRebroadcast]
    }

    /// Leaves the room and closes the transport.
    pub fn leave(&mut self) -> Vec<Effect> {
        info!("leaving room");
        self.reset_room_view();
        self.state = SessionState::Closed;
        vec![Effect::StopRebroadcast, Effect::CloseTransport]
    }

    // -- Inbound ----------------------------------------------------------

    /// Routes one relay message.
    pub fn handle(&mut self, msg: ServerMessage) -> Vec<Effect> {
        debug!(kind = msg.kind(), state = %self.state, "relay message");
        if self.state == SessionState::Closed {
            debug!(kind = msg.kind(), "session closed, ignoring");
            return Vec::new();
        }

        match msg {
            ServerMessage::RoomCreated { room_id, player_id } => {
                self.confirm(Role::Host, room_id, player_id, 1);
                Vec::new()
            }
            ServerMessage::JoinedRoom {
                room_id,
                player_id,
                player_count,
            } => {
                self.confirm(Role::Client, room_id, player_id, player_count);
                Vec::new()
            }
            ServerMessage::PlayerJoined {
                player_id,
                username,
                player_count,
            } => {
                let name = Roster::display_name(&player_id, username.as_deref());
                info!(player = %player_id, %name, player_count, "player joined");
                if self.roster.insert(player_id, name.clone()) {
                    self.lobby.append_roster_entry(&name);
                }
                self.set_player_count(player_count);
                Vec::new()
            }
            ServerMessage::PlayerLeft { player_id } => {
                info!(player = %player_id, "player left");
                self.roster.remove(&player_id);
                self.reconciler.remove(&mut self.sim, &player_id);
                self.set_player_count(self.player_count.saturating_sub(1));
                Vec::new()
            }
            ServerMessage::GameState {
                players,
                sync,
                player_count,
                started,
                ..
            } => self.apply_game_state(&players, &sync, player_count, started),
            ServerMessage::HostBroadcast { payload } => self.dispatch_command(&payload),
            ServerMessage::GameStarted { player_count } => {
                info!(player_count, "game started");
                self.start_simulation_once()
            }
            ServerMessage::Error { message } => self.fail(&message),
            ServerMessage::Unknown => {
                warn!("ignoring relay message of unknown type");
                Vec::new()
            }
        }
    }

    fn confirm(&mut self, role: Role, room: RoomCode, player_id: ParticipantId, player_count: usize) {
        if self.state != SessionState::Joining {
            warn!(state = %self.state, %room, "unexpected room confirmation");
        }
        info!(%role, %room, player = %player_id, player_count, "joined room");

        self.lobby.set_room_code(&room);
        let name = Roster::display_name(&player_id, self.config.username.as_deref());
        if self.roster.insert(player_id.clone(), name.clone()) {
            self.lobby.append_roster_entry(&name);
        }
        self.reconciler.set_local_id(player_id.clone());
        self.player_id = Some(player_id);
        self.state = SessionState::Active { role, room };
        self.set_player_count(player_count);
    }

    fn apply_game_state(
        &mut self,
        players: &BTreeMap<ParticipantId, PlayerState>,
        sync: &SyncBundle,
        player_count: usize,
        started: bool,
    ) -> Vec<Effect> {
        if !self.state.is_active() {
            debug!(state = %self.state, "snapshot before confirmation, ignoring");
            return Vec::new();
        }

        let report = self.reconciler.apply_snapshot(&mut self.sim, players);
        for id in &report.spawned {
            let username = players.get(id).and_then(|p| p.username.as_deref());
            let name = Roster::display_name(id, username);
            if self.roster.insert(id.clone(), name.clone()) {
                self.lobby.append_roster_entry(&name);
            }
        }

        if !self.broadcaster.is_host() && !sync.is_empty() {
            self.registry.apply_incoming(&mut self.sim, sync);
        }
        if player_count != self.player_count {
            self.set_player_count(player_count);
        }
        if started && !self.broadcaster.is_host() {
            return self.start_simulation_once();
        }
        Vec::new()
    }

    /// Runs each sub-command present in a host envelope.
    fn dispatch_command(&mut self, command: &HostCommand) -> Vec<Effect> {
        if command.is_empty() {
            debug!("empty host command");
        }
        let mut effects = Vec::new();
        if command.start_game {
            effects.extend(self.start_simulation_once());
        }
        if let Some(level) = &command.set_level {
            info!(%level, "host changed level");
            self.sim.transition_to_level(level);
        }
        if command.restart_level {
            info!("host restarted level");
            self.sim.restart_current_level();
        }
        effects
    }

    /// Starts the simulation unless it already runs. A host also arms the
    /// start re-broadcast.
    fn start_simulation_once(&mut self) -> Vec<Effect> {
        if self.sim.is_running() {
            return Vec::new();
        }
        info!("starting simulation");
        self.sim.start();
        if self.broadcaster.is_host() {
            self.rebroadcast.start();
            if self.rebroadcast.is_active() {
                return vec![Effect::StartRebroadcast];
            }
        }
        Vec::new()
    }

    /// A fatal session error: show it, tear down, close.
    fn fail(&mut self, message: &str) -> Vec<Effect> {
        warn!(%message, "session error from relay");
        self.lobby.show_error(message);
        self.reset_room_view();
        self.state = SessionState::Closed;
        vec![Effect::StopRebroadcast, Effect::CloseTransport]
    }

    fn reset_room_view(&mut self) {
        self.reconciler.clear(&mut self.sim);
        self.roster.clear();
        self.rebroadcast.stop();
        self.key_edges.reset();
        self.player_id = None;
    }

    fn set_player_count(&mut self, count: usize) {
        self.player_count = count;
        self.lobby.show_player_count(count);
    }

    // -- Outbound ---------------------------------------------------------

    /// Per-tick sends: the local player state, key edges on a client, and the
    /// sync bundle on the host.
    pub fn outbound_tick(&mut self) -> Vec<Effect> {
        if !self.state.is_active() {
            return Vec::new();
        }
        let local = self.sim.local_player_state();
        let mut effects = Vec::new();

        if !self.broadcaster.is_host() {
            effects.extend(self.key_edges.update(&local.keys).into_iter().map(Effect::Send));
        }
        effects.push(Effect::Send(self.broadcaster.assemble_outgoing_player_state(local)));

        if self.broadcaster.is_host() {
            match self.broadcaster.assemble_sync(&self.registry, &self.sim) {
                Ok(Some(msg)) => effects.push(Effect::Send(msg)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "sync assembly failed"),
            }
        }
        effects
    }

    /// One re-broadcast interval elapsed.
    pub fn rebroadcast_tick(&mut self) -> Vec<Effect> {
        if !self.state.is_active() || !self.sim.is_running() {
            self.rebroadcast.stop();
            return vec![Effect::StopRebroadcast];
        }
        let mut effects: Vec<Effect> = self.rebroadcast.tick().into_iter().map(Effect::Send).collect();
        if !self.rebroadcast.is_active() {
            effects.push(Effect::StopRebroadcast);
        }
        effects
    }

    // -- Host actions -----------------------------------------------------

    /// Host: ask the relay to start, and start locally.
    pub fn start_game(&mut self) -> Result<Vec<Effect>, ClientError> {
        self.require_active_host("start the game")?;
        let mut effects = vec![Effect::Send(ClientMessage::StartGame)];
        effects.extend(self.start_simulation_once());
        Ok(effects)
    }

    /// Host: move every participant to `level`.
    pub fn change_level(&mut self, level: &str) -> Result<Vec<Effect>, ClientError> {
        self.require_active_host("change the level")?;
        let msg = self.broadcaster.broadcast_command(HostCommand::set_level(level))?;
        self.sim.transition_to_level(level);
        Ok(vec![Effect::Send(msg)])
    }

    /// Host: restart the current level everywhere.
    pub fn restart_level(&mut self) -> Result<Vec<Effect>, ClientError> {
        self.require_active_host("restart the level")?;
        let msg = self.broadcaster.broadcast_command(HostCommand::restart_level())?;
        self.sim.restart_current_level();
        Ok(vec![Effect::Send(msg)])
    }

    fn require_active_host(&self, action: &'static str) -> Result<(), ClientError> {
        if !self.broadcaster.is_host() {
            return Err(ClientError::NotHost(action));
        }
        if !self.state.is_active() {
            return Err(ClientError::NotActive);
        }
        Ok(())
    }

    // -- Accessors --------------------------------------------------------

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Relay-assigned id of this participant, once confirmed.
    pub fn player_id(&self) -> Option<&ParticipantId> {
        self.player_id.as_ref()
    }

    pub fn room(&self) -> Option<&RoomCode> {
        match &self.state {
            SessionState::Active { room, .. } => Some(room),
            _ => None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.player_count
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn reconciler(&self) -> &PlayerReconciler<S::Body> {
        &self.reconciler
    }

    /// Where entity synchronizers are registered.
    pub fn registry_mut(&mut self) -> &mut SyncRegistry<S> {
        &mut self.registry
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn lobby(&self) -> &L {
        &self.lobby
    }

    pub fn rebroadcast_interval(&self) -> Duration {
        self.rebroadcast.interval()
    }
}

impl<S: Simulation, L: Lobby> fmt::Debug for Session<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("player_id", &self.player_id)
            .field("player_count", &self.player_count)
            .field("proxies", &self.reconciler.len())
            .finish()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use coopsync_protocol::Position;
    use serde_json::json;

    use super::*;
    use crate::{RemotePlayer, player_count_label};

    // =====================================================================
    // Fakes
    // =====================================================================

    #[derive(Default)]
    struct FakeSim {
        running: bool,
        starts: u32,
        levels: Vec<String>,
        restarts: u32,
        spawned: Vec<String>,
        removed: u32,
        local: PlayerState,
        doors: BTreeMap<u64, bool>,
    }

    impl Simulation for FakeSim {
        type Body = String;

        fn add_remote_player(&mut self, id: &ParticipantId, _color: &str) -> String {
            self.spawned.push(id.to_string());
            id.to_string()
        }

        fn update_remote_player(&mut self, _body: &mut String, _player: &RemotePlayer) {}

        fn remove_proxy(&mut self, _body: String) {
            self.removed += 1;
        }

        fn local_player_state(&self) -> PlayerState {
            self.local.clone()
        }

        fn start(&mut self) {
            self.running = true;
            self.starts += 1;
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn transition_to_level(&mut self, level: &str) {
            self.levels.push(level.to_string());
        }

        fn restart_current_level(&mut self) {
            self.restarts += 1;
        }
    }

    #[derive(Default)]
    struct FakeLobby {
        room_code: Option<String>,
        status: Option<String>,
        roster: Vec<String>,
        errors: Vec<String>,
        disconnected: bool,
    }

    impl Lobby for FakeLobby {
        fn set_room_code(&mut self, code: &RoomCode) {
            self.room_code = Some(code.to_string());
        }

        fn show_player_count(&mut self, count: usize) {
            self.status = Some(player_count_label(count));
        }

        fn append_roster_entry(&mut self, name: &str) {
            self.roster.push(name.to_string());
        }

        fn show_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }

        fn show_disconnected(&mut self) {
            self.disconnected = true;
        }
    }

    type TestSession = Session<FakeSim, FakeLobby>;

    fn client(room: &str) -> TestSession {
        Session::new(
            SessionConfig::client(RoomCode::new(room)).with_username("alice"),
            FakeSim::default(),
            FakeLobby::default(),
        )
    }

    fn host() -> TestSession {
        Session::new(
            SessionConfig::host(None).with_rebroadcast(Duration::from_secs(3), 2),
            FakeSim::default(),
            FakeLobby::default(),
        )
    }

    fn joined_client() -> TestSession {
        let mut session = client("AB12XY");
        session.begin();
        session.handle(ServerMessage::JoinedRoom {
            room_id: RoomCode::new("AB12XY"),
            player_id: ParticipantId::new("p-2"),
            player_count: 2,
        });
        session
    }

    fn created_host() -> TestSession {
        let mut session = host();
        session.begin();
        session.handle(ServerMessage::RoomCreated {
            room_id: RoomCode::new("K3X9QZ"),
            player_id: ParticipantId::new("p-1"),
        });
        session
    }

    fn snapshot(ids: &[&str], started: bool) -> ServerMessage {
        ServerMessage::GameState {
            players: ids
                .iter()
                .map(|id| (ParticipantId::new(*id), PlayerState::default()))
                .collect(),
            sync: SyncBundle::new(),
            room_id: RoomCode::new("AB12XY"),
            player_count: ids.len(),
            started,
        }
    }

    fn sent(effects: &[Effect]) -> Vec<&ClientMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    // =====================================================================
    // Join flow
    // =====================================================================

    #[test]
    fn test_begin_sends_join_with_room_and_username() {
        let mut session = client("AB12XY");
        let effects = session.begin();

        assert_eq!(session.state(), &SessionState::Joining);
        assert_eq!(
            effects,
            vec![Effect::Send(ClientMessage::Join {
                role: Role::Client,
                room_id: Some(RoomCode::new("AB12XY")),
                username: Some("alice".into()),
            })]
        );
    }

    #[test]
    fn test_on_transport_initial_open_begins() {
        let mut session = client("AB12XY");
        let effects = session.on_transport(TransportEvent::Opened { reconnected: false });
        assert_eq!(session.state(), &SessionState::Joining);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_handle_joined_room_activates_and_shows_player_count() {
        let session = joined_client();

        assert_eq!(
            session.state(),
            &SessionState::Active {
                role: Role::Client,
                room: RoomCode::new("AB12XY")
            }
        );
        assert_eq!(session.lobby().status.as_deref(), Some("Players: 2"));
        assert_eq!(session.lobby().room_code.as_deref(), Some("AB12XY"));
        assert_eq!(session.player_id(), Some(&ParticipantId::new("p-2")));
        assert_eq!(session.lobby().roster, vec!["alice"]);
    }

    #[test]
    fn test_handle_room_created_activates_host() {
        let session = created_host();
        assert_eq!(session.room(), Some(&RoomCode::new("K3X9QZ")));
        assert_eq!(session.player_count(), 1);
        assert_eq!(session.lobby().roster, vec!["p-1"]);
    }

    #[test]
    fn test_handle_player_joined_updates_roster_and_count() {
        let mut session = created_host();
        session.handle(ServerMessage::PlayerJoined {
            player_id: ParticipantId::new("p-2"),
            username: Some("bo".into()),
            player_count: 2,
        });

        assert_eq!(session.roster().name(&ParticipantId::new("p-2")), Some("bo"));
        assert_eq!(session.lobby().roster, vec!["p-1", "bo"]);
        assert_eq!(session.lobby().status.as_deref(), Some("Players: 2"));
    }

    // =====================================================================
    // Errors and transport
    // =====================================================================

    #[test]
    fn test_handle_error_closes_and_shows_message_verbatim() {
        let mut session = client("AB12XY");
        session.begin();

        let effects = session.handle(ServerMessage::error("Room is full"));

        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(session.lobby().errors, vec!["Room is full"]);
        assert!(effects.contains(&Effect::CloseTransport));
    }

    #[test]
    fn test_handle_error_tears_down_proxies() {
        let mut session = joined_client();
        session.handle(snapshot(&["p-1", "p-2", "p-3"], false));
        assert_eq!(session.reconciler().len(), 2);

        session.handle(ServerMessage::error("Host disconnected. Room closed."));

        assert!(session.reconciler().is_empty());
        assert_eq!(session.simulation().removed, 2);
    }

    #[test]
    fn test_handle_after_close_is_ignored() {
        let mut session = joined_client();
        session.handle(ServerMessage::error("bye"));
        session.handle(snapshot(&["p-1", "p-2"], true));
        assert!(session.reconciler().is_empty());
        assert!(!session.simulation().running);
    }

    #[test]
    fn test_on_transport_malformed_message_is_dropped() {
        let mut session = joined_client();
        let effects = session.on_transport(TransportEvent::Message(b"{oops".to_vec()));
        assert!(effects.is_empty());
        assert!(session.state().is_active());
    }

    #[test]
    fn test_on_transport_decodes_and_routes_message() {
        let mut session = client("AB12XY");
        session.begin();
        let bytes = serde_json::to_vec(&json!({
            "type": "joinedRoom", "roomId": "AB12XY", "playerId": "p-2", "playerCount": 2
        }))
        .unwrap();

        session.on_transport(TransportEvent::Message(bytes));

        assert!(session.state().is_active());
    }

    #[test]
    fn test_on_reconnected_rejoins_same_room() {
        let mut session = created_host();
        let effects = session.on_transport(TransportEvent::Opened { reconnected: true });

        assert_eq!(session.state(), &SessionState::Joining);
        assert!(effects.contains(&Effect::Send(ClientMessage::Join {
            role: Role::Host,
            room_id: Some(RoomCode::new("K3X9QZ")),
            username: None,
        })));
        assert!(session.player_id().is_none());
    }

    #[test]
    fn test_on_reconnected_without_rejoin_closes() {
        let mut session = Session::new(
            SessionConfig::client(RoomCode::new("AB12XY")).with_rejoin_on_reconnect(false),
            FakeSim::default(),
            FakeLobby::default(),
        );
        session.begin();

        let effects = session.on_reconnected();

        assert_eq!(session.state(), &SessionState::Closed);
        assert!(effects.contains(&Effect::CloseTransport));
    }

    #[test]
    fn test_on_transport_disconnected_shows_status_and_closes() {
        let mut session = joined_client();
        session.handle(snapshot(&["p-1", "p-2"], false));

        session.on_transport(TransportEvent::Disconnected);

        assert!(session.lobby().disconnected);
        assert_eq!(session.state(), &SessionState::Closed);
        assert!(session.reconciler().is_empty());
    }

    // =====================================================================
    // Snapshots
    // =====================================================================

    #[test]
    fn test_handle_game_state_spawns_remote_players_only() {
        let mut session = joined_client();
        session.handle(snapshot(&["p-1", "p-2", "p-3"], false));

        let ids: Vec<&str> = session.reconciler().ids().map(ParticipantId::as_str).collect();
        assert_eq!(ids, vec!["p-1", "p-3"]);
        assert_eq!(session.lobby().roster, vec!["alice", "p-1", "p-3"]);
    }

    #[test]
    fn test_handle_game_state_before_confirmation_is_ignored() {
        let mut session = client("AB12XY");
        session.begin();
        session.handle(snapshot(&["p-1"], false));
        assert!(session.reconciler().is_empty());
    }

    #[test]
    fn test_handle_game_state_started_starts_client_once() {
        let mut session = joined_client();
        session.handle(snapshot(&["p-1", "p-2"], true));
        session.handle(snapshot(&["p-1", "p-2"], true));
        assert_eq!(session.simulation().starts, 1);
    }

    #[test]
    fn test_handle_game_state_applies_sync_on_client() {
        let mut session = joined_client();
        session
            .registry_mut()
            .register(
                "doors",
                |_: &FakeSim| Vec::new(),
                |sim: &mut FakeSim, rec: &serde_json::Value| {
                    if let (Some(id), Some(open)) = (rec["id"].as_u64(), rec["open"].as_bool()) {
                        sim.doors.insert(id, open);
                    }
                },
            )
            .unwrap();

        let mut players = BTreeMap::new();
        players.insert(ParticipantId::new("p-1"), PlayerState::default());
        session.handle(ServerMessage::GameState {
            players,
            sync: SyncBundle::from([
                ("doors".to_string(), vec![json!({ "id": 4, "open": true })]),
                ("lasers".to_string(), vec![json!({ "id": 1 })]),
            ]),
            room_id: RoomCode::new("AB12XY"),
            player_count: 2,
            started: false,
        });

        assert_eq!(session.simulation().doors.get(&4), Some(&true));
    }

    #[test]
    fn test_on_transport_game_state_with_broken_record_still_applies() {
        let mut session = joined_client();
        session
            .registry_mut()
            .register(
                "doors",
                |_: &FakeSim| Vec::new(),
                |sim: &mut FakeSim, rec: &serde_json::Value| {
                    if let (Some(id), Some(open)) = (rec["id"].as_u64(), rec["open"].as_bool()) {
                        sim.doors.insert(id, open);
                    }
                },
            )
            .unwrap();
        let bytes = serde_json::to_vec(&json!({
            "type": "gameState",
            "players": {
                "p-1": { "position": { "x": 40.0, "y": 12.0 }, "frame": "run" },
                "p-3": { "position": { "x": 5 }, "scale": null, "keys": { "left": "yes" } }
            },
            "sync": { "boxes": { "id": 1 }, "doors": [{ "id": 7, "open": true }] },
            "roomId": "AB12XY",
            "playerCount": 3,
            "started": false
        }))
        .unwrap();

        session.on_transport(TransportEvent::Message(bytes));

        let ids: Vec<&str> = session.reconciler().ids().map(ParticipantId::as_str).collect();
        assert_eq!(ids, vec!["p-1", "p-3"]);
        let host = session.reconciler().get(&ParticipantId::new("p-1")).unwrap();
        assert_eq!(host.position, Some(Position::new(40.0, 12.0)));
        assert_eq!(session.simulation().doors.get(&7), Some(&true));
    }

    #[test]
    fn test_handle_player_left_removes_proxy_fast_path() {
        let mut session = joined_client();
        session.handle(snapshot(&["p-1", "p-2", "p-3"], false));

        session.handle(ServerMessage::PlayerLeft {
            player_id: ParticipantId::new("p-3"),
        });
        session.handle(snapshot(&["p-1", "p-2"], false));

        assert!(session.reconciler().get(&ParticipantId::new("p-3")).is_none());
        assert_eq!(session.simulation().removed, 1);
    }

    // =====================================================================
    // Host commands
    // =====================================================================

    #[test]
    fn test_handle_host_broadcast_dispatches_every_sub_command() {
        let mut session = joined_client();
        session.handle(ServerMessage::HostBroadcast {
            payload: HostCommand {
                start_game: true,
                set_level: Some("castle".into()),
                restart_level: true,
            },
        });

        let sim = session.simulation();
        assert!(sim.running);
        assert_eq!(sim.levels, vec!["castle"]);
        assert_eq!(sim.restarts, 1);
    }

    #[test]
    fn test_handle_game_started_repeat_is_noop() {
        let mut session = joined_client();
        session.handle(ServerMessage::GameStarted { player_count: 2 });
        session.handle(ServerMessage::GameStarted { player_count: 2 });
        assert_eq!(session.simulation().starts, 1);
    }

    #[test]
    fn test_start_game_host_sends_and_arms_rebroadcast() {
        let mut session = created_host();
        let effects = session.start_game().unwrap();

        assert_eq!(effects[0], Effect::Send(ClientMessage::StartGame));
        assert!(effects.contains(&Effect::StartRebroadcast));
        assert!(session.simulation().running);

        // The relay's gameStarted echo does not start twice.
        let echo = session.handle(ServerMessage::GameStarted { player_count: 1 });
        assert!(echo.is_empty());
        assert_eq!(session.simulation().starts, 1);
    }

    #[test]
    fn test_start_game_client_is_refused() {
        let mut session = joined_client();
        assert!(matches!(session.start_game(), Err(ClientError::NotHost(_))));
    }

    #[test]
    fn test_start_game_before_confirmation_is_refused() {
        let mut session = host();
        session.begin();
        assert!(matches!(session.start_game(), Err(ClientError::NotActive)));
    }

    #[test]
    fn test_rebroadcast_tick_bounded_by_count() {
        let mut session = created_host();
        session.start_game().unwrap();

        let first = session.rebroadcast_tick();
        let second = session.rebroadcast_tick();
        let third = session.rebroadcast_tick();

        assert_eq!(
            sent(&first),
            vec![&ClientMessage::Broadcast {
                payload: HostCommand::start_game()
            }]
        );
        assert_eq!(sent(&second).len(), 1);
        assert!(second.contains(&Effect::StopRebroadcast));
        assert!(sent(&third).is_empty());
    }

    #[test]
    fn test_change_level_broadcasts_and_transitions_locally() {
        let mut session = created_host();
        let effects = session.change_level("forest").unwrap();

        assert_eq!(
            effects,
            vec![Effect::Send(ClientMessage::Broadcast {
                payload: HostCommand::set_level("forest")
            })]
        );
        assert_eq!(session.simulation().levels, vec!["forest"]);
    }

    #[test]
    fn test_restart_level_broadcasts_and_restarts_locally() {
        let mut session = created_host();
        let effects = session.restart_level().unwrap();
        assert_eq!(sent(&effects).len(), 1);
        assert_eq!(session.simulation().restarts, 1);
    }

    // =====================================================================
    // Outbound ticks
    // =====================================================================

    #[test]
    fn test_outbound_tick_inactive_sends_nothing() {
        let mut session = client("AB12XY");
        assert!(session.outbound_tick().is_empty());
    }

    #[test]
    fn test_outbound_tick_client_sends_key_edges_then_player() {
        let mut session = joined_client();
        session.simulation_mut().local.position = Some(Position::new(1.0, 2.0));
        session.simulation_mut().local.set_key("arrowleft", true);

        let first = session.outbound_tick();
        let second = session.outbound_tick();

        let first = sent(&first);
        assert_eq!(first.len(), 2);
        assert_eq!(
            first[0],
            &ClientMessage::Key {
                keycode: "arrowleft".into(),
                pressed: true
            }
        );
        assert!(matches!(first[1], ClientMessage::Player { .. }));
        assert_eq!(sent(&second).len(), 1);
    }

    #[test]
    fn test_outbound_tick_host_includes_sync_bundle() {
        let mut session = created_host();
        session
            .registry_mut()
            .register(
                "doors",
                |sim: &FakeSim| sim.doors.iter().map(|(id, open)| json!({ "id": id, "open": open })).collect(),
                |_: &mut FakeSim, _: &serde_json::Value| {},
            )
            .unwrap();
        session.simulation_mut().doors.insert(1, true);

        let effects = session.outbound_tick();
        let msgs = sent(&effects);

        assert_eq!(msgs.len(), 2);
        let ClientMessage::Sync { bundle } = msgs[1] else {
            panic!("expected sync");
        };
        assert_eq!(bundle["doors"], vec![json!({ "id": 1, "open": true })]);
    }
}
