//! Players and their replicated fields.
//!
//! Every player carries a nickname and a custom property table. Who may
//! change them depends on which side of the wire the copy lives on:
//!
//! | Copy | Writable | Built by |
//! |------|----------|----------|
//! | local (client's own player) | yes | [`NetworkPlayer::local`] |
//! | server-side | yes | [`NetworkPlayer::server`] |
//! | remote (peers seen by a client) | no | [`NetworkPlayer::remote`] |

use std::sync::Arc;

use bitflags::bitflags;
use netsync_properties::{PropertyDelta, PropertyError, PropertyTable};
use netsync_protocol::{IncomingMessage, OutgoingMessage, PlayerId};
use rand::Rng;

use crate::SessionError;

bitflags! {
    /// Which player fields a delta carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlayerFields: u8 {
        const NICKNAME = 2;
        const CUSTOM_PROPERTIES = 4;
        const ALL = 0xFF;
    }
}

/// A player's identity and replicated state.
#[derive(Debug)]
pub struct NetworkPlayer {
    id: Option<PlayerId>,
    nickname: String,
    properties: Arc<PropertyTable>,
    pending: PlayerFields,
}

impl NetworkPlayer {
    fn with_table(read_only: bool, nickname: String) -> Self {
        Self {
            id: None,
            nickname,
            properties: Arc::new(PropertyTable::new(read_only)),
            pending: PlayerFields::empty(),
        }
    }

    /// The client's own player, with a random `Player_<n>` nickname.
    pub fn local() -> Self {
        let suffix: u32 = rand::rng().random();
        let mut player = Self::with_table(false, String::new());
        player.nickname = format!("Player_{suffix:08x}");
        player.pending = PlayerFields::NICKNAME;
        player
    }

    /// The server's copy of a connected player. Filled in by the hail.
    pub fn server() -> Self {
        Self::with_table(false, String::new())
    }

    /// A peer as seen by a client, read from full player data.
    pub fn remote(input: &mut IncomingMessage) -> Result<Self, SessionError> {
        let mut player = Self::with_table(true, String::new());
        player.read_from(input)?;
        Ok(player)
    }

    /// Room-local id; `None` while the player is in the lobby.
    pub fn id(&self) -> Option<PlayerId> {
        self.id
    }

    pub fn set_id(&mut self, id: Option<PlayerId>) {
        self.id = id;
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Changes the nickname and queues it for the next sync.
    pub fn set_nickname(&mut self, nickname: impl Into<String>) -> Result<(), PropertyError> {
        if self.properties.is_read_only() {
            return Err(PropertyError::ReadOnly);
        }
        let nickname = nickname.into();
        if self.nickname != nickname {
            self.nickname = nickname;
            self.pending |= PlayerFields::NICKNAME;
        }
        Ok(())
    }

    pub fn properties(&self) -> &Arc<PropertyTable> {
        &self.properties
    }

    pub fn is_read_only(&self) -> bool {
        self.properties.is_read_only()
    }

    /// Whether fields or properties changed since the last sync write.
    pub fn need_sync(&self) -> bool {
        !self.pending.is_empty() || self.properties.need_sync()
    }

    /// Writes every field. Pending changes are left for the next sync.
    pub fn write_to(&self, out: &mut OutgoingMessage) {
        out.write(&PlayerFields::ALL.bits()).write(&self.nickname);
        self.properties.write_snapshot(out);
    }

    /// Writes pending changes and clears them. `force` sends everything.
    pub fn write_sync(&mut self, out: &mut OutgoingMessage, force: bool) {
        if force {
            self.pending = PlayerFields::ALL;
            self.properties.force_full_sync();
        } else if self.properties.need_sync() {
            self.pending |= PlayerFields::CUSTOM_PROPERTIES;
        }

        out.write(&self.pending.bits());
        if self.pending.contains(PlayerFields::NICKNAME) {
            out.write(&self.nickname);
        }
        if self.pending.contains(PlayerFields::CUSTOM_PROPERTIES) {
            self.properties.write_delta(out);
        }
        self.pending = PlayerFields::empty();
    }

    /// Applies a delta from the wire and returns which fields it carried.
    ///
    /// Remote deltas never mark fields for this side's own sync. The
    /// whole delta is decoded first; a malformed one changes nothing.
    pub fn read_from(&mut self, input: &mut IncomingMessage) -> Result<PlayerFields, SessionError> {
        let fields = PlayerFields::from_bits_retain(input.read()?);
        let nickname: Option<String> = if fields.contains(PlayerFields::NICKNAME) {
            Some(input.read()?)
        } else {
            None
        };
        let delta = if fields.contains(PlayerFields::CUSTOM_PROPERTIES) {
            Some(PropertyDelta::read(input)?)
        } else {
            None
        };

        if let Some(delta) = delta {
            self.properties.apply(delta)?;
        }
        if let Some(nickname) = nickname {
            self.nickname = nickname;
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reopen(out: OutgoingMessage) -> IncomingMessage {
        IncomingMessage::from(out)
    }

    // =====================================================================
    // Construction
    // =====================================================================

    #[test]
    fn test_local_player_has_random_nickname_pending() {
        let a = NetworkPlayer::local();
        let b = NetworkPlayer::local();
        assert!(a.nickname().starts_with("Player_"));
        assert_ne!(a.nickname(), b.nickname());
        assert!(a.need_sync());
        assert!(a.id().is_none());
    }

    #[test]
    fn test_remote_player_is_read_only() {
        let mut local = NetworkPlayer::local();
        local.properties().set(1, 5i32).unwrap();
        let mut out = OutgoingMessage::data();
        local.write_to(&mut out);

        let mut remote = NetworkPlayer::remote(&mut reopen(out)).unwrap();
        assert_eq!(remote.nickname(), local.nickname());
        assert_eq!(remote.properties().get::<i32>(1).unwrap(), 5);
        assert_eq!(remote.set_nickname("x"), Err(PropertyError::ReadOnly));
        assert!(remote.properties().set(1, 6i32).is_err());
    }

    // =====================================================================
    // write_sync()
    // =====================================================================

    #[test]
    fn test_write_sync_sends_only_nickname_when_only_nickname_changed() {
        let mut player = NetworkPlayer::server();
        player.set_nickname("ana").unwrap();

        let mut out = OutgoingMessage::data();
        player.write_sync(&mut out, false);
        let mut input = reopen(out);
        assert_eq!(input.read::<u8>().unwrap(), PlayerFields::NICKNAME.bits());
        assert_eq!(input.read::<String>().unwrap(), "ana");
        assert!(input.is_exhausted());
        assert!(!player.need_sync());
    }

    #[test]
    fn test_write_sync_includes_property_changes() {
        let mut sender = NetworkPlayer::local();
        sender.write_sync(&mut OutgoingMessage::data(), false);
        sender.properties().set(3, true).unwrap();
        assert!(sender.need_sync());

        let mut mirror = NetworkPlayer::server();
        let mut out = OutgoingMessage::data();
        sender.write_sync(&mut out, false);
        let fields = mirror.read_from(&mut reopen(out)).unwrap();

        assert_eq!(fields, PlayerFields::CUSTOM_PROPERTIES);
        assert!(mirror.properties().get::<bool>(3).unwrap());
        assert!(!mirror.need_sync());
    }

    #[test]
    fn test_write_sync_force_sends_everything() {
        let mut sender = NetworkPlayer::local();
        sender.properties().set(1, 1u8).unwrap();
        sender.write_sync(&mut OutgoingMessage::data(), false);

        let mut out = OutgoingMessage::data();
        sender.write_sync(&mut out, true);
        let mut mirror = NetworkPlayer::server();
        mirror.read_from(&mut reopen(out)).unwrap();

        assert_eq!(mirror.nickname(), sender.nickname());
        assert_eq!(mirror.properties().get::<u8>(1).unwrap(), 1);
    }

    #[test]
    fn test_write_to_keeps_pending_changes() {
        let mut player = NetworkPlayer::server();
        player.set_nickname("kai").unwrap();
        player.properties().set(2, 2i64).unwrap();

        player.write_to(&mut OutgoingMessage::data());
        assert!(player.need_sync());
    }

    // =====================================================================
    // read_from()
    // =====================================================================

    #[test]
    fn test_read_from_with_bad_properties_keeps_old_nickname() {
        let mut out = OutgoingMessage::data();
        let fields = PlayerFields::NICKNAME | PlayerFields::CUSTOM_PROPERTIES;
        out.write(&fields.bits())
            .write(&"mallory".to_string())
            .write(&1u8)
            .write(&7u8);

        let mut mirror = NetworkPlayer::server();
        mirror.set_nickname("ana").unwrap();
        assert!(mirror.read_from(&mut reopen(out)).is_err());
        assert_eq!(mirror.nickname(), "ana");
        assert!(mirror.properties().is_empty());
    }
}
