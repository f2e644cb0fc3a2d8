//! The connected-player registry.
//!
//! `PlayerRegistry` is not thread-safe by itself. The server keeps it
//! inside its shared state and reaches it through that lock.

use std::collections::HashMap;

use netsync_protocol::{IncomingMessage, PlayerId};
use netsync_transport::ConnectionId;

use crate::{NetworkPlayer, SessionError, hail};

/// A connected player as the server tracks it.
#[derive(Debug)]
pub struct ServerPlayer {
    conn: ConnectionId,
    player: NetworkPlayer,
    room: Option<String>,
}

impl ServerPlayer {
    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    pub fn player(&self) -> &NetworkPlayer {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut NetworkPlayer {
        &mut self.player
    }

    /// Name of the room the player is in, or `None` in the lobby.
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn is_in_lobby(&self) -> bool {
        self.room.is_none()
    }

    /// The player's id inside its room.
    pub fn id(&self) -> Option<PlayerId> {
        self.player.id()
    }

    /// Moves the player into a room under the given id.
    pub fn enter_room(&mut self, room: impl Into<String>, id: PlayerId) {
        self.room = Some(room.into());
        self.player.set_id(Some(id));
    }

    /// Returns the player to the lobby and gives back the room it left.
    pub fn leave_room(&mut self) -> Option<String> {
        self.player.set_id(None);
        self.room.take()
    }
}

/// Every player that completed a hail, keyed by connection.
#[derive(Debug)]
pub struct PlayerRegistry {
    application_key: String,
    players: HashMap<ConnectionId, ServerPlayer>,
}

impl PlayerRegistry {
    /// Creates an empty registry that admits hails for `application_key`.
    pub fn new(application_key: impl Into<String>) -> Self {
        Self {
            application_key: application_key.into(),
            players: HashMap::new(),
        }
    }

    pub fn application_key(&self) -> &str {
        &self.application_key
    }

    /// Validates a hail and registers the player it introduces.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyConnected`] if the connection already has
    ///   a player
    /// - [`SessionError::ApplicationMismatch`] or
    ///   [`SessionError::InvalidHail`] if the hail is not acceptable
    pub fn connect(
        &mut self,
        conn: ConnectionId,
        hail_message: &mut IncomingMessage,
    ) -> Result<&ServerPlayer, SessionError> {
        if self.players.contains_key(&conn) {
            return Err(SessionError::AlreadyConnected(conn));
        }
        let player = hail::read_hail(hail_message, &self.application_key)?;
        tracing::info!(%conn, nickname = player.nickname(), "player connected");

        let entry = self.players.entry(conn).or_insert(ServerPlayer {
            conn,
            player,
            room: None,
        });
        Ok(&*entry)
    }

    /// Removes a player. The caller is responsible for its room.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Result<ServerPlayer, SessionError> {
        let removed = self
            .players
            .remove(&conn)
            .ok_or(SessionError::NotFound(conn))?;
        tracing::info!(%conn, "player disconnected");
        Ok(removed)
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&ServerPlayer> {
        self.players.get(&conn)
    }

    pub fn get_mut(&mut self, conn: ConnectionId) -> Option<&mut ServerPlayer> {
        self.players.get_mut(&conn)
    }

    /// Connections of every player currently in the lobby.
    pub fn players_in_lobby(&self) -> Vec<ConnectionId> {
        let mut conns: Vec<_> = self
            .players
            .values()
            .filter(|p| p.is_in_lobby())
            .map(|p| p.conn)
            .collect();
        conns.sort();
        conns
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerPlayer> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServerPlayer> {
        self.players.values_mut()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hail::write_hail;

    const KEY: &str = "arena.1.0";

    // -- Helpers --

    fn hail(nickname: &str) -> IncomingMessage {
        let mut local = NetworkPlayer::local();
        local.set_nickname(nickname).unwrap();
        IncomingMessage::from(write_hail(KEY, &local))
    }

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    // =====================================================================
    // connect()
    // =====================================================================

    #[test]
    fn test_connect_registers_player_in_lobby() {
        let mut registry = PlayerRegistry::new(KEY);
        let player = registry.connect(conn(1), &mut hail("ana")).unwrap();

        assert_eq!(player.player().nickname(), "ana");
        assert!(player.is_in_lobby());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connect_same_connection_twice_fails() {
        let mut registry = PlayerRegistry::new(KEY);
        registry.connect(conn(1), &mut hail("ana")).unwrap();

        let err = registry.connect(conn(1), &mut hail("ana")).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyConnected(c) if c == conn(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connect_wrong_application_leaves_registry_empty() {
        let mut registry = PlayerRegistry::new("other.2.0");
        let err = registry.connect(conn(1), &mut hail("ana")).unwrap_err();
        assert!(matches!(err, SessionError::ApplicationMismatch { .. }));
        assert!(registry.is_empty());
    }

    // =====================================================================
    // Rooms and lobby membership
    // =====================================================================

    #[test]
    fn test_players_in_lobby_excludes_room_members() {
        let mut registry = PlayerRegistry::new(KEY);
        registry.connect(conn(1), &mut hail("a")).unwrap();
        registry.connect(conn(2), &mut hail("b")).unwrap();
        registry.connect(conn(3), &mut hail("c")).unwrap();

        registry
            .get_mut(conn(2))
            .unwrap()
            .enter_room("room-1", PlayerId(0));

        assert_eq!(registry.players_in_lobby(), vec![conn(1), conn(3)]);
        assert_eq!(registry.get(conn(2)).unwrap().room(), Some("room-1"));
        assert_eq!(registry.get(conn(2)).unwrap().id(), Some(PlayerId(0)));
    }

    #[test]
    fn test_leave_room_clears_id_and_returns_name() {
        let mut registry = PlayerRegistry::new(KEY);
        registry.connect(conn(1), &mut hail("a")).unwrap();
        let player = registry.get_mut(conn(1)).unwrap();
        player.enter_room("room-1", PlayerId(3));

        assert_eq!(player.leave_room().as_deref(), Some("room-1"));
        assert!(player.is_in_lobby());
        assert!(player.id().is_none());
    }

    // =====================================================================
    // disconnect()
    // =====================================================================

    #[test]
    fn test_disconnect_returns_removed_player() {
        let mut registry = PlayerRegistry::new(KEY);
        registry.connect(conn(1), &mut hail("a")).unwrap();
        registry.get_mut(conn(1)).unwrap().enter_room("r", PlayerId(0));

        let removed = registry.disconnect(conn(1)).unwrap();
        assert_eq!(removed.room(), Some("r"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_unknown_connection_fails() {
        let mut registry = PlayerRegistry::new(KEY);
        let err = registry.disconnect(conn(9)).unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
