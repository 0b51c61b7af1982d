//! Wire vocabulary shared by the relay and participants.
//!
//! Every message is a JSON object with a `"type"` discriminator and camelCase
//! fields, so browser peers can speak it without a schema:
//!
//! ```text
//! {"type":"join","role":"host","username":"ana"}
//! {"type":"gameState","players":{...},"sync":{...},"roomId":"K3X9QZ","playerCount":2,"started":true}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Short code naming a room. Serialized as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Longest code accepted from a participant.
    pub const MAX_LEN: usize = 16;

    /// Wraps an already-normalized code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Normalizes user input: trims, uppercases, and rejects empty or
    /// non-alphanumeric codes.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let code = input.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(ProtocolError::InvalidMessage("room code is empty".into()));
        }
        if code.len() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidMessage(format!(
                "room code longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ProtocolError::InvalidMessage(format!(
                "room code '{code}' must be alphanumeric"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relay-assigned participant identifier. Serialized as a bare string.
///
/// Ordering is plain string ordering; snapshot truncation relies on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the session a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs the authoritative simulation and owns the room.
    Host,
    /// Mirrors the host's simulation.
    #[default]
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Client => f.write_str("client"),
        }
    }
}

// ---------------------------------------------------------------------------
// Player state
// ---------------------------------------------------------------------------

/// A point in simulation space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Last known state of one participant's avatar.
///
/// Every field is optional on the wire; missing fields take the defaults
/// below. `position` stays `None` until the participant has reported one.
///
/// Decoding is lenient per field: a field of the wrong shape (`null`, a
/// string where a number belongs, a position without `y`) falls back to its
/// default instead of failing the record, so one bad entry cannot sink a
/// whole snapshot. See [`PlayerState::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Facing: `1` right, `-1` left.
    pub direction: i32,
    /// Animation frame name.
    pub frame: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub scale: f64,
    pub ready: bool,
    pub shields: BTreeMap<String, bool>,
    pub dead: bool,
    pub keys: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            position: None,
            direction: 1,
            frame: "idle".into(),
            color: None,
            scale: 1.0,
            ready: false,
            shields: BTreeMap::new(),
            dead: false,
            keys: BTreeMap::new(),
            username: None,
        }
    }
}

impl<'de> Deserialize<'de> for PlayerState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

impl PlayerState {
    /// Builds a state from a loosely-typed record, field by field.
    ///
    /// - `position` needs numeric `x` and `y`; anything else is `None`
    /// - `direction` is reduced to its sign; `0`, `null` or a non-number reads as `1`
    /// - other fields of the wrong type take their defaults
    /// - `shields` / `keys` keep only their boolean entries
    ///
    /// A record that is not an object yields the default state.
    pub fn from_value(value: &Value) -> Self {
        let mut state = Self::default();
        let Some(record) = value.as_object() else {
            return state;
        };

        state.position = record.get("position").and_then(position_from_value);
        if let Some(direction) = record.get("direction").and_then(Value::as_f64) {
            if direction != 0.0 {
                state.direction = direction.signum() as i32;
            }
        }
        if let Some(frame) = record.get("frame").and_then(Value::as_str) {
            state.frame = frame.to_owned();
        }
        state.color = record.get("color").and_then(Value::as_str).map(str::to_owned);
        if let Some(scale) = record.get("scale").and_then(Value::as_f64) {
            state.scale = scale;
        }
        state.ready = record.get("ready").and_then(Value::as_bool).unwrap_or(false);
        state.shields = bool_map(record.get("shields"));
        state.dead = record.get("dead").and_then(Value::as_bool).unwrap_or(false);
        state.keys = bool_map(record.get("keys"));
        state.username = record.get("username").and_then(Value::as_str).map(str::to_owned);
        state
    }

    /// Folds a partial update in. Only fields present in `update` change.
    pub fn merge(&mut self, update: PlayerUpdate) {
        if let Some(position) = update.position {
            self.position = Some(position);
        }
        if let Some(direction) = update.direction {
            self.direction = direction;
        }
        if let Some(frame) = update.frame {
            self.frame = frame;
        }
        if let Some(color) = update.color {
            self.color = Some(color);
        }
        if let Some(scale) = update.scale {
            self.scale = scale;
        }
        if let Some(ready) = update.ready {
            self.ready = ready;
        }
        if let Some(shields) = update.shields {
            self.shields = shields;
        }
        if let Some(dead) = update.dead {
            self.dead = dead;
        }
        if let Some(keys) = update.keys {
            self.keys = keys;
        }
        if let Some(username) = update.username {
            self.username = Some(username);
        }
    }

    /// Records a single key edge.
    pub fn set_key(&mut self, keycode: impl Into<String>, pressed: bool) {
        self.keys.insert(keycode.into(), pressed);
    }
}

/// A partial [`PlayerState`] as sent by a participant each tick.
///
/// Absent fields mean "unchanged", not "reset to default".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shields: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl From<PlayerState> for PlayerUpdate {
    /// A full update: every field present.
    fn from(state: PlayerState) -> Self {
        Self {
            position: state.position,
            direction: Some(state.direction),
            frame: Some(state.frame),
            color: state.color,
            scale: Some(state.scale),
            ready: Some(state.ready),
            shields: Some(state.shields),
            dead: Some(state.dead),
            keys: Some(state.keys),
            username: state.username,
        }
    }
}

// ---------------------------------------------------------------------------
// Host commands and sync bundles
// ---------------------------------------------------------------------------

/// Envelope the host pushes to every client through `broadcast`.
///
/// Any combination of the three fields may be set; receivers act on each.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostCommand {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub start_game: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_level: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub restart_level: bool,
}

impl HostCommand {
    pub fn start_game() -> Self {
        Self {
            start_game: true,
            ..Self::default()
        }
    }

    pub fn set_level(level: impl Into<String>) -> Self {
        Self {
            set_level: Some(level.into()),
            ..Self::default()
        }
    }

    pub fn restart_level() -> Self {
        Self {
            restart_level: true,
            ..Self::default()
        }
    }

    /// `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        !self.start_game && self.set_level.is_none() && !self.restart_level
    }
}

/// Entity diffs keyed by sync label. Records are opaque to the relay.
pub type SyncBundle = BTreeMap<String, Vec<Value>>;

fn position_from_value(value: &Value) -> Option<Position> {
    let x = value.get("x")?.as_f64()?;
    let y = value.get("y")?.as_f64()?;
    Some(Position::new(x, y))
}

fn bool_map(value: Option<&Value>) -> BTreeMap<String, bool> {
    value
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes a bundle, dropping labels whose records are not an array.
/// `null` or a non-object bundle decodes as empty.
fn lenient_bundle<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SyncBundle, D::Error> {
    let Value::Object(labels) = Value::deserialize(deserializer)? else {
        return Ok(SyncBundle::new());
    };
    let mut bundle = SyncBundle::new();
    for (label, records) in labels {
        match records {
            Value::Array(records) => {
                bundle.insert(label, records);
            }
            other => warn!(%label, found = json_kind(&other), "sync label is not an array, skipping"),
        }
    }
    Ok(bundle)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Participant → relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create (host) or enter (client) a room.
    Join {
        #[serde(default)]
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    /// A single key press/release edge.
    Key { keycode: String, pressed: bool },
    /// The sender's own avatar state.
    Player {
        #[serde(default)]
        player: PlayerUpdate,
    },
    /// Host asks the relay to mark the room started.
    StartGame,
    /// Host command relayed to every client.
    Broadcast {
        #[serde(default)]
        payload: HostCommand,
    },
    /// Host's entity diffs, folded into every `gameState`.
    Sync {
        #[serde(default, deserialize_with = "lenient_bundle")]
        bundle: SyncBundle,
    },
    /// Any `type` this build does not know.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Key { .. } => "key",
            Self::Player { .. } => "player",
            Self::StartGame => "startGame",
            Self::Broadcast { .. } => "broadcast",
            Self::Sync { .. } => "sync",
            Self::Unknown => "unknown",
        }
    }
}

/// Relay → participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The host's room exists.
    RoomCreated {
        room_id: RoomCode,
        player_id: ParticipantId,
    },
    /// A client was admitted.
    JoinedRoom {
        room_id: RoomCode,
        player_id: ParticipantId,
        player_count: usize,
    },
    /// Sent to the host when a client is admitted.
    PlayerJoined {
        player_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        player_count: usize,
    },
    /// A member left (or dropped).
    PlayerLeft { player_id: ParticipantId },
    /// Authoritative room snapshot.
    GameState {
        #[serde(default)]
        players: BTreeMap<ParticipantId, PlayerState>,
        #[serde(default, deserialize_with = "lenient_bundle")]
        sync: SyncBundle,
        room_id: RoomCode,
        player_count: usize,
        #[serde(default)]
        started: bool,
    },
    /// A host command, delivered to clients only.
    HostBroadcast {
        #[serde(default)]
        payload: HostCommand,
    },
    /// The host started the game.
    GameStarted { player_count: usize },
    /// Fatal to the session; shown verbatim.
    Error { message: String },
    /// Any `type` this build does not know.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "roomCreated",
            Self::JoinedRoom { .. } => "joinedRoom",
            Self::PlayerJoined { .. } => "playerJoined",
            Self::PlayerLeft { .. } => "playerLeft",
            Self::GameState { .. } => "gameState",
            Self::HostBroadcast { .. } => "hostBroadcast",
            Self::GameStarted { .. } => "gameStarted",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
