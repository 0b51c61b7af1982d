//! Presentation-only member list.
//!
//! Independent of the reconciler's proxies: the roster is what the lobby
//! shows, fed by join/leave notices and by newly spawned proxies.

use std::collections::BTreeMap;

use coopsync_protocol::ParticipantId;

/// Participant id → display name.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    names: BTreeMap<ParticipantId, String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name shown for a participant: its username, or its id when it has none.
    pub fn display_name(id: &ParticipantId, username: Option<&str>) -> String {
        match username {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => id.to_string(),
        }
    }

    /// Records a member. Returns `true` if it was not listed yet.
    ///
    /// A known member keeps its original name.
    pub fn insert(&mut self, id: ParticipantId, name: String) -> bool {
        if self.names.contains_key(&id) {
            return false;
        }
        self.names.insert(id, name);
        true
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<String> {
        self.names.remove(id)
    }

    pub fn name(&self, id: &ParticipantId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.names.contains_key(id)
    }

    /// Names in participant id order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_new_member_returns_true() {
        let mut roster = Roster::new();
        assert!(roster.insert(ParticipantId::new("p-1"), "ana".into()));
        assert_eq!(roster.name(&ParticipantId::new("p-1")), Some("ana"));
    }

    #[test]
    fn test_insert_known_member_keeps_first_name() {
        let mut roster = Roster::new();
        roster.insert(ParticipantId::new("p-1"), "ana".into());
        assert!(!roster.insert(ParticipantId::new("p-1"), "Remote Player".into()));
        assert_eq!(roster.name(&ParticipantId::new("p-1")), Some("ana"));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let id = ParticipantId::new("p-7");
        assert_eq!(Roster::display_name(&id, Some("bo")), "bo");
        assert_eq!(Roster::display_name(&id, None), "p-7");
        assert_eq!(Roster::display_name(&id, Some("")), "p-7");
    }

    #[test]
    fn test_remove_and_clear() {
        let mut roster = Roster::new();
        roster.insert(ParticipantId::new("p-1"), "ana".into());
        roster.insert(ParticipantId::new("p-2"), "bo".into());

        assert_eq!(roster.remove(&ParticipantId::new("p-1")).as_deref(), Some("ana"));
        assert_eq!(roster.names().collect::<Vec<_>>(), vec!["bo"]);
        roster.clear();
        assert!(roster.is_empty());
    }
}
