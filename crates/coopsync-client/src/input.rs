//! Key edge detection for client input reporting.
//!
//! Clients do not stream their whole key map. Each frame the current key
//! state is compared with the previous one, and only press/release
//! transitions of the control keys become `key` messages.

use std::collections::BTreeMap;

use coopsync_protocol::ClientMessage;

/// Control keys in left, right, up, down order.
pub const DEFAULT_CONTROLS: [&str; 4] = ["arrowleft", "arrowright", "arrowup", "arrowdown"];

/// Tracks the previous frame's control key state.
#[derive(Debug, Clone)]
pub struct KeyEdges {
    controls: Vec<String>,
    previous: BTreeMap<String, bool>,
}

impl KeyEdges {
    /// Tracks the given control keys. Key names are matched lowercase.
    pub fn new<I, S>(controls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            controls: controls
                .into_iter()
                .map(|k| k.as_ref().to_ascii_lowercase())
                .collect(),
            previous: BTreeMap::new(),
        }
    }

    /// Compares `keys` (lowercase key name → held) against the previous
    /// frame and returns one `key` message per changed control key.
    ///
    /// Keys missing from `keys` count as released.
    pub fn update(&mut self, keys: &BTreeMap<String, bool>) -> Vec<ClientMessage> {
        let mut edges = Vec::new();
        for control in &self.controls {
            let now = keys.get(control).copied().unwrap_or(false);
            let before = self.previous.get(control).copied().unwrap_or(false);
            if now != before {
                edges.push(ClientMessage::Key {
                    keycode: control.clone(),
                    pressed: now,
                });
                self.previous.insert(control.clone(), now);
            }
        }
        edges
    }

    /// Forgets the previous frame, so held keys are reported again.
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    pub fn controls(&self) -> &[String] {
        &self.controls
    }
}

impl Default for KeyEdges {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROLS)
    }
}
