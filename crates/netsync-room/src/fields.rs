//! Replicated room fields shared by the server and client room views.
//!
//! A room delta is `[u8 RoomFields][IsVisible: bool][MaxPlayers: u8]
//! [CustomProperties: table delta]`, each field present only when its
//! flag is set.

use std::sync::Arc;

use bitflags::bitflags;
use netsync_properties::{PropertyDelta, PropertyTable};
use netsync_protocol::{IncomingMessage, OutgoingMessage, RoomInfo, RoomOptions};

use crate::RoomError;

bitflags! {
    /// Which room fields a delta carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RoomFields: u8 {
        const IS_VISIBLE = 2;
        const MAX_PLAYERS = 4;
        const CUSTOM_PROPERTIES = 8;
        const ALL = 0xFF;
    }
}

/// Room state both sides replicate, with pending-change tracking.
#[derive(Debug)]
pub(crate) struct RoomCore {
    pub(crate) info: RoomInfo,
    is_visible: bool,
    properties: Arc<PropertyTable>,
    pending: RoomFields,
}

impl RoomCore {
    pub(crate) fn new(options: &RoomOptions) -> Self {
        let mut info = RoomInfo::from_options(options);
        info.mark_synced();
        Self {
            info,
            is_visible: options.is_visible,
            properties: Arc::new(PropertyTable::new(false)),
            pending: RoomFields::empty(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.info.name()
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        if self.is_visible != visible {
            self.is_visible = visible;
            self.pending |= RoomFields::IS_VISIBLE;
        }
    }

    pub(crate) fn max_players(&self) -> u8 {
        self.info.max_players()
    }

    pub(crate) fn set_max_players(&mut self, max: u8) {
        if self.info.max_players() != max {
            self.info.set_max_players(max);
            self.pending |= RoomFields::MAX_PLAYERS;
        }
    }

    pub(crate) fn properties(&self) -> &Arc<PropertyTable> {
        &self.properties
    }

    pub(crate) fn need_sync(&self) -> bool {
        !self.pending.is_empty() || self.properties.need_sync()
    }

    /// Writes the given fields. Custom properties go out as a full
    /// snapshot and pending changes stay queued.
    pub(crate) fn write_snapshot(&self, out: &mut OutgoingMessage, fields: RoomFields) {
        out.write(&fields.bits());
        if fields.contains(RoomFields::IS_VISIBLE) {
            out.write(&self.is_visible);
        }
        if fields.contains(RoomFields::MAX_PLAYERS) {
            out.write(&self.info.max_players());
        }
        if fields.contains(RoomFields::CUSTOM_PROPERTIES) {
            self.properties.write_snapshot(out);
        }
    }

    /// Writes pending changes, clears them, and returns what was written.
    /// `force` sends everything.
    pub(crate) fn write_sync(&mut self, out: &mut OutgoingMessage, force: bool) -> RoomFields {
        if force {
            self.pending = RoomFields::ALL;
            self.properties.force_full_sync();
        } else if self.properties.need_sync() {
            self.pending |= RoomFields::CUSTOM_PROPERTIES;
        }

        out.write(&self.pending.bits());
        if self.pending.contains(RoomFields::IS_VISIBLE) {
            out.write(&self.is_visible);
        }
        if self.pending.contains(RoomFields::MAX_PLAYERS) {
            out.write(&self.info.max_players());
        }
        if self.pending.contains(RoomFields::CUSTOM_PROPERTIES) {
            self.properties.write_delta(out);
        }
        std::mem::take(&mut self.pending)
    }

    /// Applies a delta from the wire without queueing it for this side's
    /// own sync. Returns the fields it carried.
    ///
    /// Every field is decoded before any is applied, so a truncated delta
    /// leaves the room as it was.
    pub(crate) fn read_fields(&mut self, input: &mut IncomingMessage) -> Result<RoomFields, RoomError> {
        let fields = RoomFields::from_bits_retain(input.read()?);
        let visible: Option<bool> = if fields.contains(RoomFields::IS_VISIBLE) {
            Some(input.read()?)
        } else {
            None
        };
        let max: Option<u8> = if fields.contains(RoomFields::MAX_PLAYERS) {
            Some(input.read()?)
        } else {
            None
        };
        let delta = if fields.contains(RoomFields::CUSTOM_PROPERTIES) {
            Some(PropertyDelta::read(input)?)
        } else {
            None
        };

        if let Some(delta) = delta {
            self.properties.apply(delta)?;
        }
        if let Some(visible) = visible {
            self.is_visible = visible;
        }
        if let Some(max) = max {
            self.info.set_max_players(max);
        }
        Ok(fields)
    }
}
