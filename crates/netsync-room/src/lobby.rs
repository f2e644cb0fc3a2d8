//! The client's directory of rooms visible from the lobby.

use std::collections::BTreeMap;

use netsync_protocol::{IncomingMessage, RefreshLobbyRooms, RoomInfo};

use crate::RoomError;

/// What a lobby refresh changed, by room name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyChanges {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl LobbyChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Known rooms keyed by name.
#[derive(Debug, Default)]
pub struct Lobby {
    rooms: BTreeMap<String, RoomInfo>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&RoomInfo> {
        self.rooms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    /// Rooms in name order.
    pub fn rooms(&self) -> impl Iterator<Item = &RoomInfo> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Forgets every room, as when the session ends.
    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    /// Applies a lobby refresh.
    ///
    /// An absolute refresh replaces the known set. An incremental one
    /// merges `included` by name and then deletes `removed`, so a room
    /// named in both lists ends up absent.
    pub fn apply_refresh(&mut self, refresh: RefreshLobbyRooms) -> LobbyChanges {
        let mut changes = LobbyChanges::default();

        if refresh.is_absolute {
            let previous = std::mem::take(&mut self.rooms);
            for room in refresh.included {
                let name = room.name().to_string();
                if previous.contains_key(&name) {
                    changes.updated.push(name.clone());
                } else {
                    changes.added.push(name.clone());
                }
                self.rooms.insert(name, room);
            }
            changes.removed = previous
                .into_keys()
                .filter(|name| !self.rooms.contains_key(name))
                .collect();
            return changes;
        }

        for room in refresh.included {
            let name = room.name().to_string();
            if self.rooms.insert(name.clone(), room).is_some() {
                changes.updated.push(name);
            } else {
                changes.added.push(name);
            }
        }
        for name in refresh.removed {
            if self.rooms.remove(&name).is_some() {
                changes.added.retain(|added| *added != name);
                changes.updated.retain(|updated| *updated != name);
                changes.removed.push(name);
            }
        }
        changes
    }

    /// Applies a `RefreshRoomInLobbyProperties` message:
    /// `[string name][room info delta]`.
    ///
    /// A delta for a room the lobby does not know is consumed and dropped.
    pub fn apply_room_update(&mut self, input: &mut IncomingMessage) -> Result<Option<String>, RoomError> {
        let name: String = input.read()?;
        match self.rooms.get_mut(&name) {
            Some(room) => {
                room.read_from(input)?;
                Ok(Some(name))
            }
            None => {
                tracing::debug!(room = %name, "update for unknown lobby room dropped");
                RoomInfo::decode(input)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use netsync_protocol::{OutgoingMessage, RoomOptions};

    use super::*;

    fn info(name: &str) -> RoomInfo {
        RoomInfo::from_options(&RoomOptions::named(name))
    }

    fn incremental(included: &[&str], removed: &[&str]) -> RefreshLobbyRooms {
        RefreshLobbyRooms {
            is_absolute: false,
            included: included.iter().map(|n| info(n)).collect(),
            removed: removed.iter().map(|n| n.to_string()).collect(),
        }
    }

    // ---------------------------------------------------------------------
    // apply_refresh
    // ---------------------------------------------------------------------

    #[test]
    fn test_absolute_refresh_replaces_everything() {
        let mut lobby = Lobby::new();
        lobby.apply_refresh(RefreshLobbyRooms::absolute(vec![info("a"), info("b")]));

        let changes = lobby.apply_refresh(RefreshLobbyRooms::absolute(vec![info("b"), info("c")]));
        assert_eq!(changes.added, vec!["c"]);
        assert_eq!(changes.updated, vec!["b"]);
        assert_eq!(changes.removed, vec!["a"]);
        assert_eq!(lobby.rooms().map(RoomInfo::name).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_incremental_refresh_merges_and_removes() {
        let mut lobby = Lobby::new();
        lobby.apply_refresh(incremental(&["a", "b"], &[]));
        let changes = lobby.apply_refresh(incremental(&["c"], &["a"]));

        assert_eq!(changes.added, vec!["c"]);
        assert_eq!(changes.removed, vec!["a"]);
        assert!(!lobby.contains("a"));
        assert!(lobby.contains("b"));
        assert!(lobby.contains("c"));
    }

    #[test]
    fn test_incremental_refresh_removal_wins_over_inclusion() {
        let mut lobby = Lobby::new();
        let changes = lobby.apply_refresh(incremental(&["A"], &["A"]));
        assert!(!lobby.contains("A"));
        assert!(changes.added.is_empty());
        assert_eq!(changes.removed, vec!["A"]);
    }

    #[test]
    fn test_incremental_refresh_is_commutative_for_distinct_names() {
        let mut first = Lobby::new();
        first.apply_refresh(incremental(&["x"], &[]));
        first.apply_refresh(incremental(&["y"], &["x"]));

        let mut second = Lobby::new();
        second.apply_refresh(incremental(&["y"], &[]));
        second.apply_refresh(incremental(&["x"], &[]));
        second.apply_refresh(incremental(&[], &["x"]));

        let names = |l: &Lobby| l.rooms().map(|r| r.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn test_removing_unknown_room_reports_nothing() {
        let mut lobby = Lobby::new();
        assert!(lobby.apply_refresh(incremental(&[], &["ghost"])).is_empty());
    }

    // ---------------------------------------------------------------------
    // apply_room_update
    // ---------------------------------------------------------------------

    #[test]
    fn test_room_update_changes_player_count() {
        let mut lobby = Lobby::new();
        lobby.apply_refresh(incremental(&["a"], &[]));

        let mut source = info("a");
        source.mark_synced();
        source.set_player_count(3);
        let mut out = OutgoingMessage::data();
        out.write("a");
        source.write_sync(&mut out);

        let updated = lobby.apply_room_update(&mut IncomingMessage::from(out)).unwrap();
        assert_eq!(updated.as_deref(), Some("a"));
        assert_eq!(lobby.get("a").unwrap().player_count(), 3);
    }

    #[test]
    fn test_room_update_for_unknown_room_is_dropped() {
        let mut lobby = Lobby::new();
        let mut source = info("zzz");
        let mut out = OutgoingMessage::data();
        out.write("zzz");
        source.write_sync(&mut out);

        let mut input = IncomingMessage::from(out);
        assert_eq!(lobby.apply_room_update(&mut input).unwrap(), None);
        assert!(input.is_exhausted());
        assert!(lobby.is_empty());
    }
}
