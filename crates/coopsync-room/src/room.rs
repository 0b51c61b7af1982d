//! Room actor: one Tokio task per room.
//!
//! The actor owns the member table, the merged player states, the host's
//! latest sync bundle, and the snapshot pacer. Every mutation and every
//! fan-out happens inside its loop, so a snapshot never observes a
//! half-applied join or leave.

use std::collections::BTreeMap;

use coopsync_protocol::{
    HostCommand, ParticipantId, PlayerState, PlayerUpdate, Role, RoomCode, ServerMessage,
    SyncBundle,
};
use tokio::sync::{mpsc, oneshot};

use crate::{RoomConfig, RoomError, RoomState, SnapshotPacer};

/// Message sent to members when the host goes away.
pub const HOST_LEFT_MESSAGE: &str = "Host disconnected. Room closed.";

/// Channel sender delivering relay messages to one member's connection.
pub type MemberSender = mpsc::UnboundedSender<ServerMessage>;

/// Something a member asks its room to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberAction {
    /// Merge a partial avatar update.
    UpdatePlayer(PlayerUpdate),
    /// Record one key edge.
    Key { keycode: String, pressed: bool },
    /// Mark the room started (host only).
    StartGame,
    /// Relay a command to every client (host only).
    Broadcast(HostCommand),
    /// Replace the room's sync bundle (host only).
    Sync(SyncBundle),
}

impl MemberAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdatePlayer(_) => "player",
            Self::Key { .. } => "key",
            Self::StartGame => "startGame",
            Self::Broadcast(_) => "broadcast",
            Self::Sync(_) => "sync",
        }
    }
}

/// Result of a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// `true` when the leave tore the room down.
    pub room_closed: bool,
    /// Members still present (0 when closed).
    pub remaining: usize,
}

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    Join {
        participant: ParticipantId,
        username: Option<String>,
        sender: MemberSender,
        reply: oneshot::Sender<Result<usize, RoomError>>,
    },
    Leave {
        participant: ParticipantId,
        reply: oneshot::Sender<LeaveOutcome>,
    },
    Action {
        participant: ParticipantId,
        action: MemberAction,
    },
    GetInfo {
        reply: oneshot::Sender<RoomInfo>,
    },
    Shutdown,
}

/// A snapshot of room metadata.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomCode,
    pub host: ParticipantId,
    pub state: RoomState,
    pub player_count: usize,
    pub max_players: usize,
    pub started: bool,
    /// Snapshots broadcast so far.
    pub snapshots_sent: u64,
    /// `false` once the host's connection has dropped its member channel.
    pub host_connected: bool,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomCode,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomCode {
        &self.room_id
    }

    /// Admits a client. Returns the member count after admission.
    pub async fn join(
        &self,
        participant: ParticipantId,
        username: Option<String>,
        sender: MemberSender,
    ) -> Result<usize, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Join {
            participant,
            username,
            sender,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Removes a member. Closes the room if the member was the host.
    pub async fn leave(&self, participant: ParticipantId) -> Result<LeaveOutcome, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Leave {
            participant,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Queues a member action (fire-and-forget).
    pub async fn act(&self, participant: ParticipantId, action: MemberAction) -> Result<(), RoomError> {
        self.send(RoomCommand::Action { participant, action }).await
    }

    pub async fn get_info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::GetInfo { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Stops the actor. Members' channels close without a message.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender.send(cmd).await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.room_id.clone())
    }
}

struct Member {
    role: Role,
    username: Option<String>,
    state: PlayerState,
    sender: MemberSender,
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    room_id: RoomCode,
    host: ParticipantId,
    state: RoomState,
    config: RoomConfig,
    members: BTreeMap<ParticipantId, Member>,
    sync: SyncBundle,
    pacer: SnapshotPacer,
    snapshots_sent: u64,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        tracing::info!(room_id = %self.room_id, host = %self.host, "room actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle(cmd) {
                        break;
                    }
                }
                _ = self.pacer.wait_for_tick() => self.broadcast_snapshot(),
            }
        }

        self.state = RoomState::Closed;
        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    /// Applies one command. Returns `true` when the actor should stop.
    fn handle(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join {
                participant,
                username,
                sender,
                reply,
            } => {
                let _ = reply.send(self.handle_join(participant, username, sender));
                false
            }
            RoomCommand::Leave { participant, reply } => {
                let outcome = self.handle_leave(&participant);
                let _ = reply.send(outcome);
                outcome.room_closed
            }
            RoomCommand::Action {
                participant,
                action,
            } => {
                self.handle_action(participant, action);
                false
            }
            RoomCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
                false
            }
            RoomCommand::Shutdown => {
                tracing::info!(room_id = %self.room_id, "room shutting down");
                true
            }
        }
    }

    fn handle_join(
        &mut self,
        participant: ParticipantId,
        username: Option<String>,
        sender: MemberSender,
    ) -> Result<usize, RoomError> {
        if self.members.contains_key(&participant) {
            return Err(RoomError::AlreadyInRoom(participant, self.room_id.clone()));
        }
        if !self.state.is_joinable() {
            return Err(RoomError::Unavailable(self.room_id.clone()));
        }
        if self.members.len() >= self.config.max_players {
            return Err(RoomError::RoomFull {
                room_id: self.room_id.clone(),
                max: self.config.max_players,
            });
        }

        let state = PlayerState {
            username: username.clone(),
            ..PlayerState::default()
        };
        self.members.insert(
            participant.clone(),
            Member {
                role: Role::Client,
                username: username.clone(),
                state,
                sender,
            },
        );
        let player_count = self.members.len();
        tracing::info!(
            room_id = %self.room_id,
            %participant,
            players = player_count,
            max = self.config.max_players,
            "participant joined"
        );

        // Confirmation first, so it precedes any snapshot on this channel.
        self.send_to(
            &participant,
            ServerMessage::JoinedRoom {
                room_id: self.room_id.clone(),
                player_id: participant.clone(),
                player_count,
            },
        );
        let host = self.host.clone();
        self.send_to(
            &host,
            ServerMessage::PlayerJoined {
                player_id: participant,
                username,
                player_count,
            },
        );

        Ok(player_count)
    }

    fn handle_leave(&mut self, participant: &ParticipantId) -> LeaveOutcome {
        let Some(member) = self.members.remove(participant) else {
            tracing::debug!(room_id = %self.room_id, %participant, "leave from non-member");
            return LeaveOutcome {
                room_closed: false,
                remaining: self.members.len(),
            };
        };

        if member.role == Role::Host {
            tracing::info!(
                room_id = %self.room_id,
                %participant,
                notified = self.members.len(),
                "host left, closing room"
            );
            self.broadcast(&ServerMessage::error(HOST_LEFT_MESSAGE));
            self.members.clear();
            self.state = RoomState::Closed;
            return LeaveOutcome {
                room_closed: true,
                remaining: 0,
            };
        }

        tracing::info!(
            room_id = %self.room_id,
            %participant,
            players = self.members.len(),
            "participant left"
        );
        self.broadcast(&ServerMessage::PlayerLeft {
            player_id: participant.clone(),
        });

        let room_closed = self.members.is_empty();
        if room_closed {
            self.state = RoomState::Closed;
        }
        LeaveOutcome {
            room_closed,
            remaining: self.members.len(),
        }
    }

    fn handle_action(&mut self, participant: ParticipantId, action: MemberAction) {
        let Some(member) = self.members.get_mut(&participant) else {
            tracing::warn!(
                room_id = %self.room_id,
                %participant,
                kind = action.kind(),
                "action from non-member, ignoring"
            );
            return;
        };
        let is_host = member.role == Role::Host;

        match action {
            MemberAction::UpdatePlayer(update) => {
                if let Some(username) = &update.username {
                    member.username = Some(username.clone());
                }
                member.state.merge(update);
            }
            MemberAction::Key { keycode, pressed } => {
                member.state.set_key(keycode, pressed);
            }
            MemberAction::StartGame => {
                if !is_host {
                    tracing::warn!(room_id = %self.room_id, %participant, "non-host tried to start the game");
                    let message = RoomError::NotHost(participant.clone()).to_string();
                    self.send_to(&participant, ServerMessage::error(message));
                    return;
                }
                self.start_game();
            }
            MemberAction::Broadcast(payload) => {
                if !is_host {
                    tracing::warn!(room_id = %self.room_id, %participant, "broadcast from non-host, ignoring");
                    return;
                }
                let msg = ServerMessage::HostBroadcast { payload };
                for (id, member) in &self.members {
                    if member.role != Role::Host {
                        Self::deliver(id, member, msg.clone());
                    }
                }
            }
            MemberAction::Sync(bundle) => {
                if !is_host {
                    tracing::warn!(room_id = %self.room_id, %participant, "sync from non-host, ignoring");
                    return;
                }
                self.sync = bundle;
            }
        }
    }

    /// Marks the room started and tells everyone. Repeats are re-announced
    /// so a late joiner picks up the start from the host's re-broadcast.
    fn start_game(&mut self) {
        if self.state.can_transition_to(RoomState::Active) {
            self.state = RoomState::Active;
            tracing::info!(room_id = %self.room_id, players = self.members.len(), "game started");
        }
        self.broadcast(&ServerMessage::GameStarted {
            player_count: self.members.len(),
        });
    }

    fn snapshot(&self) -> ServerMessage {
        let players = self
            .members
            .iter()
            .map(|(id, member)| {
                let mut state = member.state.clone();
                if state.username.is_none() {
                    state.username = member.username.clone();
                }
                (id.clone(), state)
            })
            .collect();
        ServerMessage::GameState {
            players,
            sync: self.sync.clone(),
            room_id: self.room_id.clone(),
            player_count: self.members.len(),
            started: self.state == RoomState::Active,
        }
    }

    fn broadcast_snapshot(&mut self) {
        if self.members.is_empty() {
            return;
        }
        let msg = self.snapshot();
        self.broadcast(&msg);
        self.snapshots_sent += 1;
    }

    fn broadcast(&self, msg: &ServerMessage) {
        for (id, member) in &self.members {
            Self::deliver(id, member, msg.clone());
        }
    }

    fn send_to(&self, participant: &ParticipantId, msg: ServerMessage) {
        if let Some(member) = self.members.get(participant) {
            Self::deliver(participant, member, msg);
        }
    }

    /// Drops the message if the member's connection is already gone; its
    /// handler's leave is on the way.
    fn deliver(id: &ParticipantId, member: &Member, msg: ServerMessage) {
        if member.sender.send(msg).is_err() {
            tracing::trace!(participant = %id, "member channel closed, dropping message");
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            host: self.host.clone(),
            state: self.state,
            player_count: self.members.len(),
            max_players: self.config.max_players,
            started: self.state == RoomState::Active,
            snapshots_sent: self.snapshots_sent,
            host_connected: self
                .members
                .get(&self.host)
                .is_some_and(|host| !host.sender.is_closed()),
        }
    }
}

/// Spawns a room with `host` as its first member and returns a handle.
///
/// The host receives `roomCreated` before anything else.
pub(crate) fn spawn_room(
    room_id: RoomCode,
    config: RoomConfig,
    host: ParticipantId,
    username: Option<String>,
    sender: MemberSender,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));

    let _ = sender.send(ServerMessage::RoomCreated {
        room_id: room_id.clone(),
        player_id: host.clone(),
    });

    let mut members = BTreeMap::new();
    members.insert(
        host.clone(),
        Member {
            role: Role::Host,
            username: username.clone(),
            state: PlayerState {
                username,
                ..PlayerState::default()
            },
            sender,
        },
    );

    let actor = RoomActor {
        room_id: room_id.clone(),
        host,
        state: RoomState::Pending,
        pacer: SnapshotPacer::new(config.snapshot_rate_hz, config.initial_jitter),
        config,
        members,
        sync: SyncBundle::new(),
        snapshots_sent: 0,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle { room_id, sender: tx }
}
