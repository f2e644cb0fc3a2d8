//! The client's view of the room it is in.

use std::collections::BTreeMap;
use std::sync::Arc;

use netsync_properties::PropertyTable;
use netsync_protocol::{IncomingMessage, OutgoingMessage, PlayerId, RoomInfo, RoomOptions};
use netsync_session::{NetworkPlayer, PlayerFields};

use crate::fields::RoomCore;
use crate::{RoomError, RoomFields};

/// Something that happened to the roster of the client's room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    MasterClientChanged(PlayerId),
}

/// A room as its members see it.
///
/// Holds the other players as read-only [`NetworkPlayer`]s. The local
/// player is owned by the client and only its id is recorded here.
#[derive(Debug)]
pub struct LocalRoom {
    core: RoomCore,
    local_id: PlayerId,
    remote: BTreeMap<PlayerId, NetworkPlayer>,
    master: PlayerId,
}

impl LocalRoom {
    /// The room a successful create produced: the creator is alone with
    /// the first id.
    pub fn from_options(options: &RoomOptions) -> Self {
        Self {
            core: RoomCore::new(options),
            local_id: PlayerId::FIRST,
            remote: BTreeMap::new(),
            master: PlayerId::FIRST,
        }
    }

    /// Builds the room from a successful join response.
    pub fn from_join_data(
        options: &RoomOptions,
        input: &mut IncomingMessage,
    ) -> Result<Self, RoomError> {
        let mut core = RoomCore::new(options);
        core.read_fields(input)?;

        let count: i32 = input.read()?;
        let mut remote = BTreeMap::new();
        for _ in 0..count.max(0) {
            let id: PlayerId = input.read()?;
            remote.insert(id, NetworkPlayer::remote(input)?);
        }

        let local_id: PlayerId = input.read()?;
        core.properties().apply_delta(input)?;

        let mut room = Self {
            core,
            local_id,
            remote,
            master: local_id,
        };
        room.master = room.lowest_id();
        Ok(room)
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

    pub fn max_players(&self) -> u8 {
        self.core.max_players()
    }

    pub fn set_max_players(&mut self, max: u8) {
        self.core.set_max_players(max);
    }

    pub fn properties(&self) -> &Arc<PropertyTable> {
        self.core.properties()
    }

    /// Descriptor with a player count matching the roster.
    pub fn info(&self) -> RoomInfo {
        let mut info = self.core.info.clone();
        info.set_player_count(u8::try_from(self.player_count()).unwrap_or(u8::MAX));
        info
    }

    pub fn local_player_id(&self) -> PlayerId {
        self.local_id
    }

    pub fn master_client_id(&self) -> PlayerId {
        self.master
    }

    pub fn is_master_client(&self) -> bool {
        self.master == self.local_id
    }

    pub fn player_count(&self) -> usize {
        self.remote.len() + 1
    }

    pub fn remote_player(&self, id: PlayerId) -> Option<&NetworkPlayer> {
        self.remote.get(&id)
    }

    pub fn remote_players(&self) -> impl Iterator<Item = (PlayerId, &NetworkPlayer)> {
        self.remote.iter().map(|(id, p)| (*id, p))
    }

    pub fn need_sync(&self) -> bool {
        self.core.need_sync()
    }

    /// Writes pending room fields for a `SetRoomProperties` request.
    pub fn write_sync(&mut self, out: &mut OutgoingMessage, force: bool) -> RoomFields {
        self.core.write_sync(out, force)
    }

    /// Applies a `RefreshCurrentRoomProperties` delta.
    pub fn read_fields(&mut self, input: &mut IncomingMessage) -> Result<RoomFields, RoomError> {
        self.core.read_fields(input)
    }

    /// Applies a `RefreshPlayersInRoom` sync and reports what changed.
    pub fn read_player_list_sync(
        &mut self,
        input: &mut IncomingMessage,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        let mut events = Vec::new();

        let removed: i32 = input.read()?;
        for _ in 0..removed.max(0) {
            let id: PlayerId = input.read()?;
            if self.remote.remove(&id).is_some() {
                events.push(RoomEvent::PlayerLeft(id));
            }
        }

        let included: i32 = input.read()?;
        for _ in 0..included.max(0) {
            let id: PlayerId = input.read()?;
            let player = NetworkPlayer::remote(input)?;
            if id != self.local_id {
                self.remote.insert(id, player);
                events.push(RoomEvent::PlayerJoined(id));
            }
        }

        let master = self.lowest_id();
        if master != self.master {
            self.master = master;
            events.push(RoomEvent::MasterClientChanged(master));
        }
        Ok(events)
    }

    /// Applies a `RefreshOtherPlayerProperties` message: `[id][player delta]`.
    pub fn read_player_properties(
        &mut self,
        input: &mut IncomingMessage,
    ) -> Result<(PlayerId, PlayerFields), RoomError> {
        let id: PlayerId = input.read()?;
        let player = self.remote.get_mut(&id).ok_or(RoomError::UnknownPlayer(id))?;
        let fields = player.read_from(input)?;
        Ok((id, fields))
    }

    fn lowest_id(&self) -> PlayerId {
        self.remote
            .keys()
            .next()
            .map_or(self.local_id, |first| (*first).min(self.local_id))
    }
}
