//! Reconciles remote player avatars against authoritative snapshots.
//!
//! Every `gameState` carries the full player set. [`PlayerReconciler`] makes
//! the local simulation match it:
//!
//! 1. Truncate the snapshot to the participant cap, in identifier order.
//! 2. Skip the local participant.
//! 3. Spawn a proxy for every new identifier, then blend its fields toward
//!    the record.
//! 4. Tear down every proxy whose identifier is missing.
//!
//! Absence from a snapshot is the authoritative removal signal.
//! [`PlayerReconciler::remove`] is only a fast path for explicit leaves.

use std::collections::{BTreeMap, HashSet};

use coopsync_protocol::{ParticipantId, PlayerState, Position};
use tracing::{debug, info};

use crate::Simulation;

/// Colors handed to remote players that did not report one.
pub const DEFAULT_PALETTE: [&str; 8] = ["red", "blue", "yellow", "green", "orange", "pink", "purple", "gray"];

/// Settings for a [`PlayerReconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Snapshot entries considered per snapshot, local player included.
    pub max_participants: usize,
    /// Blend factor toward the server value, in `0.0..=1.0`.
    pub smoothing: f64,
    pub palette: Vec<String>,
    /// Display name for players that did not send one.
    pub default_username: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_participants: 6,
            smoothing: 0.8,
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            default_username: "Remote Player".into(),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_max_participants(mut self, max: usize) -> Self {
        self.max_participants = max;
        self
    }

    /// Overrides the blend factor. Clamped to `0.0..=1.0`.
    pub fn with_smoothing(mut self, alpha: f64) -> Self {
        self.smoothing = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn with_palette<I, S>(mut self, palette: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.palette = palette.into_iter().map(Into::into).collect();
        self
    }
}

/// Reconciled view of one remote player, as handed to the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: ParticipantId,
    pub username: String,
    pub color: String,
    /// Smoothed position. `None` until the player has reported one.
    pub position: Option<Position>,
    pub direction: i32,
    pub frame: String,
    /// Latest reported scale, applied as-is.
    pub scale: f64,
    pub ready: bool,
    pub shields: BTreeMap<String, bool>,
    pub dead: bool,
    pub keys: BTreeMap<String, bool>,
}

impl RemotePlayer {
    fn spawn(id: ParticipantId, username: String, color: String) -> Self {
        let defaults = PlayerState::default();
        Self {
            id,
            username,
            color,
            position: None,
            direction: defaults.direction,
            frame: defaults.frame,
            scale: defaults.scale,
            ready: defaults.ready,
            shields: defaults.shields,
            dead: defaults.dead,
            keys: defaults.keys,
        }
    }

    /// Blends this view toward `record`.
    ///
    /// Only the position is smoothed: a first position snaps into place,
    /// later ones move `alpha` of the way, and a record without one leaves
    /// it alone. Every other field takes the reported value.
    fn blend(&mut self, record: &PlayerState, alpha: f64) {
        if let Some(target) = record.position {
            self.position = Some(match self.position {
                Some(current) => Position::new(lerp(current.x, target.x, alpha), lerp(current.y, target.y, alpha)),
                None => target,
            });
        }
        self.scale = record.scale;
        self.direction = record.direction;
        self.frame.clone_from(&record.frame);
        if let Some(color) = &record.color {
            self.color.clone_from(color);
        }
        self.ready = record.ready;
        self.shields.clone_from(&record.shields);
        self.dead = record.dead;
        self.keys.clone_from(&record.keys);
    }
}

/// `current × (1 − alpha) + target × alpha`.
pub fn lerp(current: f64, target: f64, alpha: f64) -> f64 {
    current * (1.0 - alpha) + target * alpha
}

/// What one [`PlayerReconciler::apply_snapshot`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub spawned: Vec<ParticipantId>,
    pub updated: usize,
    pub removed: Vec<ParticipantId>,
    /// Snapshot entries dropped by the participant cap.
    pub truncated: usize,
}

impl ReconcileReport {
    /// `true` if the proxy set changed.
    pub fn membership_changed(&self) -> bool {
        !self.spawned.is_empty() || !self.removed.is_empty()
    }
}

struct Proxy<B> {
    body: B,
    view: RemotePlayer,
}

/// Owns the remote player proxies for one participant.
///
/// `B` is the simulation's avatar handle ([`Simulation::Body`]).
pub struct PlayerReconciler<B> {
    config: ReconcilerConfig,
    local_id: Option<ParticipantId>,
    proxies: BTreeMap<ParticipantId, Proxy<B>>,
    next_color: usize,
}

impl<B> PlayerReconciler<B> {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            local_id: None,
            proxies: BTreeMap::new(),
            next_color: 0,
        }
    }

    /// Sets the identifier the relay assigned to this participant.
    ///
    /// A proxy already spawned under this id is not removed here. The next
    /// snapshot skips the id, so that proxy counts as absent and is torn
    /// down then.
    pub fn set_local_id(&mut self, id: ParticipantId) {
        self.local_id = Some(id);
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    /// Makes the proxy set match `players`.
    ///
    /// Idempotent apart from smoothing convergence: the same snapshot twice
    /// creates and removes nothing the second time.
    pub fn apply_snapshot<S>(&mut self, sim: &mut S, players: &BTreeMap<ParticipantId, PlayerState>) -> ReconcileReport
    where
        S: Simulation<Body = B>,
    {
        let mut report = ReconcileReport {
            truncated: players.len().saturating_sub(self.config.max_participants),
            ..ReconcileReport::default()
        };
        if report.truncated > 0 {
            debug!(
                entries = players.len(),
                max = self.config.max_participants,
                "snapshot over participant cap, truncating"
            );
        }

        let considered: Vec<(&ParticipantId, &PlayerState)> =
            players.iter().take(self.config.max_participants).collect();
        let mut seen: HashSet<&ParticipantId> = HashSet::with_capacity(considered.len());

        for (id, record) in considered {
            if self.local_id.as_ref() == Some(id) {
                continue;
            }
            seen.insert(id);

            if !self.proxies.contains_key(id) {
                let proxy = self.spawn(sim, id, record);
                self.proxies.insert(id.clone(), proxy);
                report.spawned.push(id.clone());
            }
            if let Some(proxy) = self.proxies.get_mut(id) {
                proxy.view.blend(record, self.config.smoothing);
                sim.update_remote_player(&mut proxy.body, &proxy.view);
                report.updated += 1;
            }
        }

        let absent: Vec<ParticipantId> = self
            .proxies
            .keys()
            .filter(|id| !seen.contains(id))
            .cloned()
            .collect();
        for id in absent {
            if self.remove(sim, &id) {
                report.removed.push(id);
            }
        }

        report
    }

    /// Tears down the proxy for `id`, if any. Returns whether one existed.
    pub fn remove<S>(&mut self, sim: &mut S, id: &ParticipantId) -> bool
    where
        S: Simulation<Body = B>,
    {
        match self.proxies.remove(id) {
            Some(proxy) => {
                info!(player = %id, "removing remote player");
                sim.remove_proxy(proxy.body);
                true
            }
            None => false,
        }
    }

    /// Tears down every proxy.
    pub fn clear<S>(&mut self, sim: &mut S)
    where
        S: Simulation<Body = B>,
    {
        for (_, proxy) in std::mem::take(&mut self.proxies) {
            sim.remove_proxy(proxy.body);
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&RemotePlayer> {
        self.proxies.get(id).map(|p| &p.view)
    }

    /// Identifiers with a live proxy, in order.
    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.proxies.keys()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn spawn<S>(&mut self, sim: &mut S, id: &ParticipantId, record: &PlayerState) -> Proxy<B>
    where
        S: Simulation<Body = B>,
    {
        let color = match &record.color {
            Some(color) => color.clone(),
            None => self.allocate_color(),
        };
        let username = record
            .username
            .clone()
            .unwrap_or_else(|| self.config.default_username.clone());

        info!(player = %id, %username, %color, "adding remote player");
        let body = sim.add_remote_player(id, &color);
        Proxy {
            body,
            view: RemotePlayer::spawn(id.clone(), username, color),
        }
    }

    /// Next palette color not worn by a live proxy. Falls back to plain
    /// rotation once every color is taken.
    fn allocate_color(&mut self) -> String {
        let palette = &self.config.palette;
        if palette.is_empty() {
            return "gray".into();
        }
        let in_use: HashSet<&str> = self.proxies.values().map(|p| p.view.color.as_str()).collect();
        let start = self.next_color;
        let pick = (0..palette.len())
            .map(|offset| (start + offset) % palette.len())
            .find(|&i| !in_use.contains(palette[i].as_str()))
            .unwrap_or(start % palette.len());
        self.next_color = pick + 1;
        palette[pick].clone()
    }
}

impl<B> Default for PlayerReconciler<B> {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}
