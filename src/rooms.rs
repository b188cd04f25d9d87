use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

/// Opaque transport-assigned identity of one live connection.
pub type ConnectionId = String;

// ---------------------------------------------------------------------------
// RoomId
// ---------------------------------------------------------------------------

/// Key of the two-party channel shared by a rider and a driver.
///
/// Derived by sorting the two participant ids and joining them with `_`,
/// so both sides compute the same key no matter who initiates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Canonical key for an unordered pair of participants.
    pub fn for_pair(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}_{second}"))
    }

    /// The other participant encoded in a pair-form key, if `participant`
    /// is one of the pair. Returns `None` for keys that are not pair-form.
    pub fn counterpart(&self, participant: &str) -> Option<&str> {
        if let Some(rest) = self
            .0
            .strip_prefix(participant)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return Some(rest);
        }
        self.0
            .strip_suffix(participant)
            .and_then(|rest| rest.strip_suffix('_'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

// ---------------------------------------------------------------------------
// RoomRegistry
// ---------------------------------------------------------------------------

/// In-memory map from room to the set of connections currently joined.
///
/// Purely transient: the registry is rebuilt as clients reconnect after a
/// restart. Member sets are ordered so fan-out and target resolution are
/// deterministic. Empty rooms are never retained.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns true if the connection was not already a member.
    pub fn add(&mut self, room: &RoomId, conn: &str) -> bool {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(conn.to_string())
    }

    /// Idempotent. Drops the room entry when the last member leaves.
    /// Returns true if the room entry is now gone.
    pub fn remove(&mut self, room: &RoomId, conn: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        members.remove(conn);
        if members.is_empty() {
            self.rooms.remove(room);
            return true;
        }
        false
    }

    /// Current members of `room`, empty when the room is unknown.
    pub fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room: &RoomId, conn: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(conn))
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// All rooms with their member sets, in key order.
    pub fn rooms(&self) -> impl Iterator<Item = (&RoomId, &BTreeSet<ConnectionId>)> {
        self.rooms.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(RoomId::for_pair("u1", "d1"), RoomId::for_pair("d1", "u1"));
        assert_eq!(RoomId::for_pair("u1", "d1").as_str(), "d1_u1");
    }

    #[test]
    fn counterpart_resolves_both_sides() {
        let room = RoomId::for_pair("u1", "d1");
        assert_eq!(room.counterpart("u1"), Some("d1"));
        assert_eq!(room.counterpart("d1"), Some("u1"));
        assert_eq!(room.counterpart("someone-else"), None);
    }

    #[test]
    fn counterpart_requires_full_segment() {
        let room = RoomId::new("d1_u1");
        // "d" is a prefix of "d1" but not a member of the pair.
        assert_eq!(room.counterpart("d"), None);
        assert_eq!(room.counterpart("1"), None);
    }

    #[test]
    fn add_is_idempotent() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::new("d1_u1");

        assert!(registry.add(&room, "conn-a"));
        assert!(!registry.add(&room, "conn-a"));
        assert_eq!(registry.members(&room), vec!["conn-a".to_string()]);
    }

    #[test]
    fn removing_last_member_drops_the_room() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::new("d1_u1");
        registry.add(&room, "conn-a");
        registry.add(&room, "conn-b");

        assert!(!registry.remove(&room, "conn-a"));
        assert!(registry.remove(&room, "conn-b"));
        assert_eq!(registry.room_count(), 0);
        assert!(registry.members(&room).is_empty());
    }

    #[test]
    fn remove_of_unknown_member_is_a_no_op() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::new("d1_u1");
        registry.add(&room, "conn-a");

        assert!(!registry.remove(&room, "conn-b"));
        assert!(registry.contains(&room, "conn-a"));
    }

    #[test]
    fn members_iterate_in_stable_order() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::new("d1_u1");
        registry.add(&room, "conn-b");
        registry.add(&room, "conn-a");

        assert_eq!(
            registry.members(&room),
            vec!["conn-a".to_string(), "conn-b".to_string()]
        );
    }
}
