//! Relay-side rooms for coopsync.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! members, their merged player states, and the host's latest sync bundle,
//! and fans out an authoritative `gameState` snapshot at a fixed rate.
//!
//! # Key types
//!
//! - [`RoomDirectory`]: creates rooms, tracks membership, routes actions
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`MemberAction`]: what a member can ask its room to do
//! - [`SnapshotPacer`]: fixed-rate ticker driving snapshot fan-out
//! - [`RoomState`] / [`RoomConfig`]: lifecycle and settings

mod config;
mod directory;
mod error;
mod pacer;
mod room;

pub use config::{RoomConfig, RoomState};
pub use directory::{CODE_LEN, RoomDirectory, generate_code};
pub use error::RoomError;
pub use pacer::{SnapshotPacer, Tick};
pub use room::{HOST_LEFT_MESSAGE, LeaveOutcome, MemberAction, MemberSender, RoomHandle, RoomInfo};
