//! Relay configuration.
//!
//! Defaults suit a local relay; the `coopsync-relay` binary overrides them
//! from the environment:
//!
//! | variable               | field                        | default          |
//! |------------------------|------------------------------|------------------|
//! | `COOPSYNC_BIND`        | `bind_addr`                  | `127.0.0.1:8765` |
//! | `COOPSYNC_SNAPSHOT_HZ` | `room.snapshot_rate_hz`      | `30`             |
//! | `COOPSYNC_MAX_PLAYERS` | `room.max_players`           | `6`              |

use coopsync_room::RoomConfig;

use crate::CoopsyncError;

pub const ENV_BIND: &str = "COOPSYNC_BIND";
pub const ENV_SNAPSHOT_HZ: &str = "COOPSYNC_SNAPSHOT_HZ";
pub const ENV_MAX_PLAYERS: &str = "COOPSYNC_MAX_PLAYERS";

/// Everything the relay needs to start.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub room: RoomConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            room: RoomConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, CoopsyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`. Unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// [`CoopsyncError::Config`] when a value does not parse or a room would
    /// hold nobody.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoopsyncError> {
        let mut config = Self::default();

        if let Some(bind) = lookup(ENV_BIND) {
            let bind = bind.trim();
            if bind.is_empty() {
                return Err(CoopsyncError::Config(format!("{ENV_BIND} is empty")));
            }
            config.bind_addr = bind.to_string();
        }
        if let Some(hz) = lookup(ENV_SNAPSHOT_HZ) {
            config.room.snapshot_rate_hz = parse(ENV_SNAPSHOT_HZ, &hz)?;
        }
        if let Some(max) = lookup(ENV_MAX_PLAYERS) {
            let max: usize = parse(ENV_MAX_PLAYERS, &max)?;
            if max == 0 {
                return Err(CoopsyncError::Config(format!("{ENV_MAX_PLAYERS} must be at least 1")));
            }
            config.room.max_players = max;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CoopsyncError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CoopsyncError::Config(format!("{key}={value:?}: {e}")))
}
