//! Room directory: creates rooms, tracks membership, routes actions.

use std::collections::HashMap;

use coopsync_protocol::{ParticipantId, Role, RoomCode};
use rand::Rng;

use crate::room::spawn_room;
use crate::{LeaveOutcome, MemberAction, MemberSender, RoomConfig, RoomError, RoomHandle, RoomInfo};

/// Alphabet for generated room codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated room codes.
pub const CODE_LEN: usize = 6;

/// Every live room and which room each participant is in.
///
/// A participant is in at most one room at a time. The relay holds the
/// directory behind a mutex; room actors do the per-room work.
pub struct RoomDirectory {
    config: RoomConfig,
    rooms: HashMap<RoomCode, RoomHandle>,
    member_rooms: HashMap<ParticipantId, RoomCode>,
}

impl RoomDirectory {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
            member_rooms: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Handles a join request for either role.
    ///
    /// Returns the room's code. Confirmations (`roomCreated`, `joinedRoom`,
    /// `playerJoined`) travel through the member channels.
    pub async fn join(
        &mut self,
        participant: ParticipantId,
        role: Role,
        room_id: Option<RoomCode>,
        username: Option<String>,
        sender: MemberSender,
    ) -> Result<RoomCode, RoomError> {
        match role {
            Role::Host => {
                self.create_host_room(participant, room_id, username, sender)
                    .await
            }
            Role::Client => {
                let code = room_id.ok_or_else(|| RoomError::NotFound(String::new()))?;
                self.join_room(participant, code.clone(), username, sender)
                    .await?;
                Ok(code)
            }
        }
    }

    /// Creates a room owned by `host`.
    ///
    /// Uses `requested` if given, otherwise generates a fresh code. A
    /// requested code held by a room whose host connection is gone is
    /// reclaimed: the stale room closes and a new one takes the code.
    pub async fn create_host_room(
        &mut self,
        host: ParticipantId,
        requested: Option<RoomCode>,
        username: Option<String>,
        sender: MemberSender,
    ) -> Result<RoomCode, RoomError> {
        self.ensure_roomless(&host)?;

        let room_id = match requested {
            Some(code) => {
                self.reclaim_abandoned(&code).await?;
                code
            }
            None => self.fresh_code(),
        };

        let handle = spawn_room(
            room_id.clone(),
            self.config.clone(),
            host.clone(),
            username,
            sender,
        );
        self.rooms.insert(room_id.clone(), handle);
        self.member_rooms.insert(host.clone(), room_id.clone());
        tracing::info!(%room_id, %host, rooms = self.rooms.len(), "room created");
        Ok(room_id)
    }

    /// Adds a client to an existing room. Returns the member count.
    pub async fn join_room(
        &mut self,
        participant: ParticipantId,
        room_id: RoomCode,
        username: Option<String>,
        sender: MemberSender,
    ) -> Result<usize, RoomError> {
        self.ensure_roomless(&participant)?;

        let handle = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;

        let count = handle.join(participant.clone(), username, sender).await?;
        self.member_rooms.insert(participant, room_id);
        Ok(count)
    }

    /// Removes a participant from their room, dropping the room if the
    /// leave closed it.
    pub async fn leave(&mut self, participant: &ParticipantId) -> Result<LeaveOutcome, RoomError> {
        let room_id = self
            .member_rooms
            .remove(participant)
            .ok_or_else(|| RoomError::NotInRoom(participant.clone()))?;

        let outcome = match self.rooms.get(&room_id) {
            Some(handle) => match handle.leave(participant.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(%room_id, %participant, error = %e, "room vanished during leave");
                    LeaveOutcome {
                        room_closed: true,
                        remaining: 0,
                    }
                }
            },
            None => LeaveOutcome {
                room_closed: true,
                remaining: 0,
            },
        };

        if outcome.room_closed {
            self.forget_room(&room_id);
        }
        Ok(outcome)
    }

    /// Forwards an action to the participant's room.
    ///
    /// A start request from someone outside any room is refused as
    /// [`RoomError::NotHost`]; other actions yield [`RoomError::NotInRoom`].
    pub async fn route(&self, participant: &ParticipantId, action: MemberAction) -> Result<(), RoomError> {
        let Some(room_id) = self.member_rooms.get(participant) else {
            return Err(match action {
                MemberAction::StartGame => RoomError::NotHost(participant.clone()),
                _ => RoomError::NotInRoom(participant.clone()),
            });
        };
        let handle = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        handle.act(participant.clone(), action).await
    }

    /// Shuts a room down without notifying members.
    pub async fn close_room(&mut self, room_id: &RoomCode) -> Result<(), RoomError> {
        let handle = self
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        let _ = handle.shutdown().await;
        self.forget_room(room_id);
        Ok(())
    }

    /// Shuts every room down.
    pub async fn close_all(&mut self) {
        let codes: Vec<RoomCode> = self.rooms.keys().cloned().collect();
        for code in codes {
            let _ = self.close_room(&code).await;
        }
    }

    pub async fn room_info(&self, room_id: &RoomCode) -> Result<RoomInfo, RoomError> {
        let handle = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        handle.get_info().await
    }

    /// The room a participant is in, if any.
    pub fn member_room(&self, participant: &ParticipantId) -> Option<&RoomCode> {
        self.member_rooms.get(participant)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_codes(&self) -> Vec<RoomCode> {
        self.rooms.keys().cloned().collect()
    }

    /// Frees `room_id` if its host has disconnected but the leave has not
    /// landed yet. A room with a live host yields [`RoomError::AlreadyExists`].
    async fn reclaim_abandoned(&mut self, room_id: &RoomCode) -> Result<(), RoomError> {
        let Some(handle) = self.rooms.get(room_id).cloned() else {
            return Ok(());
        };
        match handle.get_info().await {
            Ok(info) if info.host_connected => {
                return Err(RoomError::AlreadyExists(room_id.clone()));
            }
            Ok(info) => {
                // Members still present get the host-left error.
                let _ = handle.leave(info.host.clone()).await;
                tracing::info!(%room_id, stale_host = %info.host, "reclaiming room from disconnected host");
            }
            Err(e) => tracing::debug!(%room_id, error = %e, "room actor gone, reclaiming code"),
        }
        self.forget_room(room_id);
        Ok(())
    }

    fn ensure_roomless(&self, participant: &ParticipantId) -> Result<(), RoomError> {
        match self.member_rooms.get(participant) {
            Some(current) => Err(RoomError::AlreadyInRoom(participant.clone(), current.clone())),
            None => Ok(()),
        }
    }

    fn forget_room(&mut self, room_id: &RoomCode) {
        self.rooms.remove(room_id);
        self.member_rooms.retain(|_, rid| rid != room_id);
        tracing::info!(%room_id, rooms = self.rooms.len(), "room removed");
    }

    fn fresh_code(&self) -> RoomCode {
        let mut rng = rand::rng();
        loop {
            let code = generate_code(&mut rng);
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

/// Draws a random [`CODE_LEN`]-character uppercase alphanumeric code.
pub fn generate_code<R: Rng>(rng: &mut R) -> RoomCode {
    let code: String = (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect();
    RoomCode::new(code)
}
