//! The server's room directory: create, join, and leave.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use netsync_protocol::{EnterRoomResultCode, IncomingMessage, RoomInfo, RoomOptions};
use netsync_session::ServerPlayer;

use crate::{RoomError, ServerRoom};

/// Decides whether a player may join an existing room.
///
/// Returning `false` answers the join with `Rejected`.
pub type JoiningHook = Arc<dyn Fn(&ServerRoom, &ServerPlayer) -> bool + Send + Sync>;

/// Which request an enter-room outcome answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterKind {
    Create,
    Join,
}

/// The result of a create, join, or join-or-create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnterOutcome {
    pub kind: EnterKind,
    pub code: EnterRoomResultCode,
}

impl EnterOutcome {
    fn created(code: EnterRoomResultCode) -> Self {
        Self {
            kind: EnterKind::Create,
            code,
        }
    }

    fn joined(code: EnterRoomResultCode) -> Self {
        Self {
            kind: EnterKind::Join,
            code,
        }
    }
}

/// What leaving did to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: String,
    /// The room emptied and no longer exists.
    pub destroyed: bool,
    pub was_visible: bool,
}

/// Every live room, keyed by name.
#[derive(Default)]
pub struct RoomDirectory {
    rooms: BTreeMap<String, ServerRoom>,
    joining_hook: Option<JoiningHook>,
}

impl fmt::Debug for RoomDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomDirectory")
            .field("rooms", &self.rooms)
            .field("joining_hook", &self.joining_hook.is_some())
            .finish()
    }
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the hook consulted before each join into an existing room.
    pub fn set_joining_hook(&mut self, hook: JoiningHook) {
        self.joining_hook = Some(hook);
    }

    pub fn get(&self, name: &str) -> Option<&ServerRoom> {
        self.rooms.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServerRoom> {
        self.rooms.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &ServerRoom> {
        self.rooms.values()
    }

    pub fn rooms_mut(&mut self) -> impl Iterator<Item = &mut ServerRoom> {
        self.rooms.values_mut()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Descriptors of every visible room, for an absolute lobby refresh.
    pub fn visible_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .values()
            .filter(|room| room.is_visible())
            .map(|room| room.info().clone())
            .collect()
    }

    /// Creates a room and puts `player` in it.
    ///
    /// `initial_properties` is read as a room property delta only when
    /// the room is created.
    pub fn create(
        &mut self,
        options: &RoomOptions,
        initial_properties: &mut IncomingMessage,
        player: &mut ServerPlayer,
    ) -> Result<EnterOutcome, RoomError> {
        if let Some(current) = player.room() {
            return Err(RoomError::AlreadyInRoom(current.to_string()));
        }
        if self.rooms.contains_key(&options.name) {
            return Ok(EnterOutcome::created(EnterRoomResultCode::RoomAlreadyExists));
        }

        let mut room = ServerRoom::new(options);
        room.properties().apply_delta(initial_properties)?;
        let Some(id) = room.add_player(player.conn()) else {
            return Ok(EnterOutcome::created(EnterRoomResultCode::RoomIsFull));
        };
        player.enter_room(options.name.clone(), id);
        tracing::info!(
            conn = %player.conn(),
            room = %options.name,
            visible = room.is_visible(),
            "room created"
        );
        self.rooms.insert(options.name.clone(), room);
        Ok(EnterOutcome::created(EnterRoomResultCode::Succeed))
    }

    /// Puts `player` in an existing room.
    pub fn join(&mut self, name: &str, player: &mut ServerPlayer) -> Result<EnterOutcome, RoomError> {
        if let Some(current) = player.room() {
            return Err(RoomError::AlreadyInRoom(current.to_string()));
        }
        let Some(room) = self.rooms.get_mut(name) else {
            return Ok(EnterOutcome::joined(EnterRoomResultCode::RoomNotExists));
        };
        if room.is_full() {
            return Ok(EnterOutcome::joined(EnterRoomResultCode::RoomIsFull));
        }
        if let Some(hook) = &self.joining_hook {
            if !hook(&*room, &*player) {
                tracing::info!(conn = %player.conn(), room = %name, "join rejected");
                return Ok(EnterOutcome::joined(EnterRoomResultCode::Rejected));
            }
        }
        let Some(id) = room.add_player(player.conn()) else {
            return Ok(EnterOutcome::joined(EnterRoomResultCode::RoomIsFull));
        };
        player.enter_room(name, id);
        tracing::info!(conn = %player.conn(), room = %name, player = %id, "player joined room");
        Ok(EnterOutcome::joined(EnterRoomResultCode::Succeed))
    }

    /// Joins the named room, creating it first if it does not exist.
    pub fn join_or_create(
        &mut self,
        options: &RoomOptions,
        initial_properties: &mut IncomingMessage,
        player: &mut ServerPlayer,
    ) -> Result<EnterOutcome, RoomError> {
        if self.rooms.contains_key(&options.name) {
            self.join(&options.name, player)
        } else {
            self.create(options, initial_properties, player)
        }
    }

    /// Takes `player` out of its room, destroying the room if it empties.
    pub fn leave(&mut self, player: &mut ServerPlayer) -> Result<LeaveOutcome, RoomError> {
        let id = player.id();
        let name = player.leave_room().ok_or(RoomError::NotInRoom)?;
        let room = self
            .rooms
            .get_mut(&name)
            .ok_or_else(|| RoomError::NotFound(name.clone()))?;

        if let Some(id) = id {
            room.remove_player(id);
        }
        let was_visible = room.is_visible();
        let destroyed = room.is_empty();
        if destroyed {
            self.rooms.remove(&name);
            tracing::info!(room = %name, "room destroyed");
        }
        tracing::info!(conn = %player.conn(), room = %name, "player left room");
        Ok(LeaveOutcome {
            room: name,
            destroyed,
            was_visible,
        })
    }
}

#[cfg(test)]
mod tests {
    use netsync_protocol::{OutgoingMessage, PlayerId};
    use netsync_session::{NetworkPlayer, PlayerRegistry, write_hail};
    use netsync_transport::ConnectionId;

    use super::*;

    const KEY: &str = "arena.1.0";

    // -- Helpers --

    fn registry_with(count: u64) -> PlayerRegistry {
        let mut registry = PlayerRegistry::new(KEY);
        for n in 1..=count {
            let mut hail = IncomingMessage::from(write_hail(KEY, &NetworkPlayer::local()));
            registry.connect(ConnectionId::new(n), &mut hail).unwrap();
        }
        registry
    }

    fn player(registry: &mut PlayerRegistry, n: u64) -> &mut ServerPlayer {
        registry.get_mut(ConnectionId::new(n)).unwrap()
    }

    fn no_props() -> IncomingMessage {
        let mut out = OutgoingMessage::data();
        out.write(&0u8).write(&0u8);
        IncomingMessage::from(out)
    }

    fn options(name: &str, max: u8) -> RoomOptions {
        RoomOptions {
            max_players: max,
            ..RoomOptions::named(name)
        }
    }

    // =====================================================================
    // create()
    // =====================================================================

    #[test]
    fn test_create_puts_creator_in_room() {
        let mut registry = registry_with(1);
        let mut directory = RoomDirectory::new();

        let outcome = directory
            .create(&options("r", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();
        assert_eq!(outcome.code, EnterRoomResultCode::Succeed);
        assert_eq!(outcome.kind, EnterKind::Create);
        assert_eq!(player(&mut registry, 1).id(), Some(PlayerId(0)));
        assert_eq!(directory.get("r").unwrap().player_count(), 1);
    }

    #[test]
    fn test_create_existing_name_is_already_exists() {
        let mut registry = registry_with(2);
        let mut directory = RoomDirectory::new();
        directory
            .create(&options("r", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();

        let outcome = directory
            .create(&options("r", 0), &mut no_props(), player(&mut registry, 2))
            .unwrap();
        assert_eq!(outcome.code, EnterRoomResultCode::RoomAlreadyExists);
        assert!(player(&mut registry, 2).is_in_lobby());
    }

    #[test]
    fn test_create_while_in_room_fails() {
        let mut registry = registry_with(1);
        let mut directory = RoomDirectory::new();
        directory
            .create(&options("r", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();
        let err = directory
            .create(&options("s", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap_err();
        assert!(matches!(err, RoomError::AlreadyInRoom(ref r) if r == "r"));
    }

    // =====================================================================
    // join()
    // =====================================================================

    #[test]
    fn test_join_missing_room_is_not_exists() {
        let mut registry = registry_with(1);
        let mut directory = RoomDirectory::new();
        let outcome = directory.join("nope", player(&mut registry, 1)).unwrap();
        assert_eq!(outcome.code, EnterRoomResultCode::RoomNotExists);
    }

    #[test]
    fn test_join_full_room_is_full() {
        let mut registry = registry_with(2);
        let mut directory = RoomDirectory::new();
        directory
            .create(&options("r", 1), &mut no_props(), player(&mut registry, 1))
            .unwrap();
        let outcome = directory.join("r", player(&mut registry, 2)).unwrap();
        assert_eq!(outcome.code, EnterRoomResultCode::RoomIsFull);
    }

    #[test]
    fn test_joining_hook_can_reject() {
        let mut registry = registry_with(2);
        let mut directory = RoomDirectory::new();
        directory.set_joining_hook(Arc::new(|room: &ServerRoom, _: &ServerPlayer| {
            room.player_count() < 1
        }));
        directory
            .create(&options("r", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();

        let outcome = directory.join("r", player(&mut registry, 2)).unwrap();
        assert_eq!(outcome.code, EnterRoomResultCode::Rejected);
        assert!(player(&mut registry, 2).is_in_lobby());
    }

    #[test]
    fn test_join_or_create_creates_then_joins() {
        let mut registry = registry_with(2);
        let mut directory = RoomDirectory::new();

        let first = directory
            .join_or_create(&options("r", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();
        let second = directory
            .join_or_create(&options("r", 0), &mut no_props(), player(&mut registry, 2))
            .unwrap();
        assert_eq!(first.kind, EnterKind::Create);
        assert_eq!(second.kind, EnterKind::Join);
        assert_eq!(second.code, EnterRoomResultCode::Succeed);
        assert_eq!(player(&mut registry, 2).id(), Some(PlayerId(1)));
    }

    // =====================================================================
    // leave()
    // =====================================================================

    #[test]
    fn test_last_player_leaving_destroys_room() {
        let mut registry = registry_with(1);
        let mut directory = RoomDirectory::new();
        directory
            .create(&options("r", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();

        let outcome = directory.leave(player(&mut registry, 1)).unwrap();
        assert!(outcome.destroyed);
        assert!(directory.is_empty());
        assert!(player(&mut registry, 1).is_in_lobby());
    }

    #[test]
    fn test_leave_from_lobby_fails() {
        let mut registry = registry_with(1);
        let mut directory = RoomDirectory::new();
        let err = directory.leave(player(&mut registry, 1)).unwrap_err();
        assert!(matches!(err, RoomError::NotInRoom));
    }

    #[test]
    fn test_visible_rooms_skips_hidden() {
        let mut registry = registry_with(2);
        let mut directory = RoomDirectory::new();
        directory
            .create(&options("shown", 0), &mut no_props(), player(&mut registry, 1))
            .unwrap();
        let hidden = RoomOptions {
            is_visible: false,
            ..RoomOptions::named("hidden")
        };
        directory
            .create(&hidden, &mut no_props(), player(&mut registry, 2))
            .unwrap();

        let names: Vec<_> = directory
            .visible_rooms()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["shown"]);
    }
}
