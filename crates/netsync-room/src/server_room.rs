//! The server's authoritative view of one room.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use netsync_properties::PropertyTable;
use netsync_protocol::{IncomingMessage, OutgoingMessage, PlayerId, RoomInfo, RoomOptions};
use netsync_session::PlayerRegistry;
use netsync_transport::ConnectionId;

use crate::fields::RoomCore;
use crate::{RoomError, RoomFields};

/// A room owned by the server's [`RoomDirectory`](crate::RoomDirectory).
///
/// Players are tracked by room id; their data lives in the
/// [`PlayerRegistry`] under their connection.
#[derive(Debug)]
pub struct ServerRoom {
    core: RoomCore,
    players: BTreeMap<PlayerId, ConnectionId>,
    next_player_id: PlayerId,
    master: Option<PlayerId>,
    /// Roster as of the last player-list sync.
    last_synced_players: BTreeSet<PlayerId>,
}

impl ServerRoom {
    pub fn new(options: &RoomOptions) -> Self {
        Self {
            core: RoomCore::new(options),
            players: BTreeMap::new(),
            next_player_id: PlayerId::FIRST,
            master: None,
            // The creator is introduced by the create response, not a sync.
            last_synced_players: BTreeSet::from([PlayerId::FIRST]),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn is_visible(&self) -> bool {
        self.core.is_visible()
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.core.set_visible(visible);
    }

    /// Zero means no limit.
    pub fn max_players(&self) -> u8 {
        self.core.max_players()
    }

    pub fn set_max_players(&mut self, max: u8) {
        self.core.set_max_players(max);
    }

    pub fn properties(&self) -> &Arc<PropertyTable> {
        self.core.properties()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// No more players fit. 255 players is always full.
    pub fn is_full(&self) -> bool {
        let count = self.players.len();
        let max = usize::from(self.max_players());
        count >= usize::from(u8::MAX) || (max != 0 && count >= max)
    }

    /// The lowest player id present.
    pub fn master_client_id(&self) -> Option<PlayerId> {
        self.master
    }

    pub fn player_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.keys().copied()
    }

    pub fn connection(&self, id: PlayerId) -> Option<ConnectionId> {
        self.players.get(&id).copied()
    }

    /// Connections of every member.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.players.values().copied().collect()
    }

    /// Connections of every member except `id`.
    pub fn connections_except(&self, id: PlayerId) -> Vec<ConnectionId> {
        self.players
            .iter()
            .filter(|(pid, _)| **pid != id)
            .map(|(_, conn)| *conn)
            .collect()
    }

    /// The lobby descriptor with a fresh player count.
    pub fn info(&self) -> &RoomInfo {
        &self.core.info
    }

    pub fn info_needs_sync(&self) -> bool {
        self.core.info.need_sync()
    }

    /// Writes the changed descriptor fields and clears them.
    pub fn write_info_sync(&mut self, out: &mut OutgoingMessage) {
        self.core.info.write_sync(out);
    }

    /// A full copy of the descriptor for a lobby include. Pending
    /// descriptor changes are considered delivered.
    pub fn take_info_snapshot(&mut self) -> RoomInfo {
        let snapshot = self.core.info.clone();
        self.core.info.mark_synced();
        snapshot
    }

    /// Adds a player under the next free id, or returns `None` if full.
    pub fn add_player(&mut self, conn: ConnectionId) -> Option<PlayerId> {
        if self.is_full() {
            return None;
        }
        let id = self.next_player_id;
        self.next_player_id = id.next();
        self.players.insert(id, conn);
        self.refresh_roster();
        tracing::debug!(room = self.name(), player = %id, %conn, "player added to room");
        Some(id)
    }

    /// Removes a player. Returns `false` if the id was not present.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        if self.players.remove(&id).is_none() {
            return false;
        }
        self.refresh_roster();
        tracing::debug!(room = self.name(), player = %id, "player removed from room");
        true
    }

    fn refresh_roster(&mut self) {
        let count = u8::try_from(self.players.len()).unwrap_or(u8::MAX);
        self.core.info.set_player_count(count);

        let master = self.players.keys().next().copied();
        if master.is_some() && master != self.master {
            tracing::debug!(room = self.name(), master = ?master, "master client changed");
            self.master = master;
        }
    }

    /// Whether room fields or properties changed since the last sync.
    pub fn need_sync(&self) -> bool {
        self.core.need_sync()
    }

    /// Writes pending room fields and clears them.
    pub fn write_sync(&mut self, out: &mut OutgoingMessage, force: bool) -> RoomFields {
        self.core.write_sync(out, force)
    }

    /// Applies a room delta sent by a member.
    pub fn read_fields(&mut self, input: &mut IncomingMessage) -> Result<RoomFields, RoomError> {
        self.core.read_fields(input)
    }

    /// Writes everything a joining player needs to build its room view.
    ///
    /// `[room fields: all][i32 others][(id, player data) × others]
    /// [joiner id][room property snapshot]`
    pub fn write_join_data(
        &self,
        out: &mut OutgoingMessage,
        joiner: PlayerId,
        registry: &PlayerRegistry,
    ) -> Result<(), RoomError> {
        self.core.write_snapshot(out, RoomFields::ALL);

        let others: Vec<_> = self.players.iter().filter(|(id, _)| **id != joiner).collect();
        out.write(&(others.len() as i32));
        for (id, conn) in others {
            let player = registry.get(*conn).ok_or(RoomError::UnknownPlayer(*id))?;
            out.write(id);
            player.player().write_to(out);
        }

        out.write(&joiner);
        self.properties().write_snapshot(out);
        Ok(())
    }

    /// Writes the roster difference since the last call.
    ///
    /// `[i32 n][id × n]` removed, then `[i32 m][(id, player data) × m]`
    /// included.
    pub fn write_player_list_sync(
        &mut self,
        out: &mut OutgoingMessage,
        registry: &PlayerRegistry,
    ) -> Result<(), RoomError> {
        let current: BTreeSet<PlayerId> = self.players.keys().copied().collect();

        let removed: Vec<_> = self.last_synced_players.difference(&current).copied().collect();
        out.write(&(removed.len() as i32));
        for id in &removed {
            out.write(id);
        }

        let included: Vec<_> = current.difference(&self.last_synced_players).copied().collect();
        out.write(&(included.len() as i32));
        for id in included {
            let player = self
                .players
                .get(&id)
                .and_then(|conn| registry.get(*conn))
                .ok_or(RoomError::UnknownPlayer(id))?;
            out.write(&id);
            player.player().write_to(out);
        }

        self.last_synced_players = current;
        Ok(())
    }
}
