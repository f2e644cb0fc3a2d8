//! Room descriptors as seen from the lobby.

use std::collections::BTreeSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{IncomingMessage, OutgoingMessage, ProtocolError};

bitflags! {
    /// Which [`RoomInfo`] fields a delta carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RoomInfoFields: u8 {
        const NAME = 2;
        const PLAYER_COUNT = 4;
        const MAX_PLAYERS = 8;
        const PROPERTIES_LISTED_IN_LOBBY = 16;
        const ALL = 0xFF;
    }
}

/// Public description of a room, shared with players in the lobby.
///
/// Setters record which fields changed so the server can send only those
/// with [`write_sync`](RoomInfo::write_sync).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomInfo {
    name: Option<String>,
    player_count: u8,
    max_players: u8,
    properties_listed_in_lobby: BTreeSet<String>,
    pending: u8,
}

impl RoomInfo {
    /// A descriptor for a new room built from its options.
    pub fn from_options(options: &RoomOptions) -> Self {
        let mut info = Self::default();
        info.name = Some(options.name.clone());
        info.set_max_players(options.max_players);
        info.set_properties_listed_in_lobby(options.properties_listed_in_lobby.clone());
        info
    }

    /// Reads a descriptor from a delta, usually one carrying all fields.
    pub fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let mut info = Self::default();
        info.read_from(input)?;
        Ok(info)
    }

    /// The room name; empty until a delta or options provided it.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn player_count(&self) -> u8 {
        self.player_count
    }

    /// Zero means no limit.
    pub fn max_players(&self) -> u8 {
        self.max_players
    }

    pub fn properties_listed_in_lobby(&self) -> &BTreeSet<String> {
        &self.properties_listed_in_lobby
    }

    pub fn set_player_count(&mut self, count: u8) {
        if self.player_count != count {
            self.player_count = count;
            self.mark(RoomInfoFields::PLAYER_COUNT);
        }
    }

    pub fn set_max_players(&mut self, max: u8) {
        if self.max_players != max {
            self.max_players = max;
            self.mark(RoomInfoFields::MAX_PLAYERS);
        }
    }

    pub fn set_properties_listed_in_lobby(&mut self, names: BTreeSet<String>) {
        if self.properties_listed_in_lobby != names {
            self.properties_listed_in_lobby = names;
            self.mark(RoomInfoFields::PROPERTIES_LISTED_IN_LOBBY);
        }
    }

    /// No more players fit. A count of 255 is always full.
    pub fn is_full(&self) -> bool {
        self.player_count == u8::MAX
            || (self.max_players != 0 && self.player_count >= self.max_players)
    }

    /// Whether any field changed since the last sync write.
    pub fn need_sync(&self) -> bool {
        self.pending != 0
    }

    /// Forgets pending changes, after the full descriptor went out.
    pub fn mark_synced(&mut self) {
        self.pending = 0;
    }

    /// Writes every field.
    pub fn write_to(&self, out: &mut OutgoingMessage) {
        self.write_fields(out, RoomInfoFields::ALL);
    }

    /// Writes the changed fields and clears the pending set.
    pub fn write_sync(&mut self, out: &mut OutgoingMessage) {
        let fields = RoomInfoFields::from_bits_retain(self.pending);
        self.write_fields(out, fields);
        self.pending = 0;
    }

    /// Applies a delta. A name that contradicts the known one is an
    /// invalid message.
    pub fn read_from(&mut self, input: &mut IncomingMessage) -> Result<(), ProtocolError> {
        let fields = RoomInfoFields::from_bits_retain(input.read()?);

        if fields.contains(RoomInfoFields::NAME) {
            let name: String = input.read()?;
            match &self.name {
                None => self.name = Some(name),
                Some(known) if *known == name => {}
                Some(known) => {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "room info for '{known}' received name '{name}'"
                    )));
                }
            }
        }
        if fields.contains(RoomInfoFields::PLAYER_COUNT) {
            self.player_count = input.read()?;
        }
        if fields.contains(RoomInfoFields::MAX_PLAYERS) {
            self.max_players = input.read()?;
        }
        if fields.contains(RoomInfoFields::PROPERTIES_LISTED_IN_LOBBY) {
            let names: Vec<String> = input.read()?;
            self.properties_listed_in_lobby = names.into_iter().collect();
        }
        Ok(())
    }

    fn mark(&mut self, field: RoomInfoFields) {
        self.pending |= field.bits();
    }

    fn write_fields(&self, out: &mut OutgoingMessage, fields: RoomInfoFields) {
        out.write(&fields.bits());
        if fields.contains(RoomInfoFields::NAME) {
            out.write(self.name());
        }
        if fields.contains(RoomInfoFields::PLAYER_COUNT) {
            out.write(&self.player_count);
        }
        if fields.contains(RoomInfoFields::MAX_PLAYERS) {
            out.write(&self.max_players);
        }
        if fields.contains(RoomInfoFields::PROPERTIES_LISTED_IN_LOBBY) {
            let names: Vec<String> = self.properties_listed_in_lobby.iter().cloned().collect();
            out.write(&names);
        }
    }
}

/// Settings a client supplies when creating a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    pub name: String,
    /// Whether the room shows up in lobby refreshes.
    pub is_visible: bool,
    /// Zero means no limit.
    pub max_players: u8,
    /// Room property names mirrored into the lobby descriptor.
    pub properties_listed_in_lobby: BTreeSet<String>,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            is_visible: true,
            max_players: 0,
            properties_listed_in_lobby: BTreeSet::new(),
        }
    }
}

impl RoomOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn write(&self, out: &mut OutgoingMessage) {
        let names: Vec<String> = self.properties_listed_in_lobby.iter().cloned().collect();
        out.write(&self.name)
            .write(&self.is_visible)
            .write(&self.max_players)
            .write(&names);
    }

    pub fn read(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let name = input.read()?;
        let is_visible = input.read()?;
        let max_players = input.read()?;
        let names: Vec<String> = input.read()?;
        Ok(Self {
            name,
            is_visible,
            max_players,
            properties_listed_in_lobby: names.into_iter().collect(),
        })
    }
}

/// A lobby update: either a full snapshot or an incremental delta.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshLobbyRooms {
    /// Replace the whole known room set instead of merging.
    pub is_absolute: bool,
    pub included: Vec<RoomInfo>,
    pub removed: Vec<String>,
}

impl RefreshLobbyRooms {
    pub fn absolute(rooms: Vec<RoomInfo>) -> Self {
        Self {
            is_absolute: true,
            included: rooms,
            removed: Vec::new(),
        }
    }

    pub fn include(room: RoomInfo) -> Self {
        Self {
            is_absolute: false,
            included: vec![room],
            removed: Vec::new(),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            is_absolute: false,
            included: Vec::new(),
            removed: vec![name.into()],
        }
    }

    pub fn write(&self, out: &mut OutgoingMessage) {
        let count = i32::try_from(self.included.len()).unwrap_or(i32::MAX);
        out.write(&self.is_absolute).write(&count);
        for room in &self.included {
            room.write_to(out);
        }
        out.write(&self.removed);
    }

    pub fn read(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let is_absolute = input.read()?;
        let count: i32 = input.read()?;
        if count < 0 {
            return Err(ProtocolError::InvalidLength(count));
        }
        let included = (0..count)
            .map(|_| RoomInfo::decode(input))
            .collect::<Result<Vec<_>, _>>()?;
        let removed = input.read()?;
        Ok(Self {
            is_absolute,
            included,
            removed,
        })
    }
}
