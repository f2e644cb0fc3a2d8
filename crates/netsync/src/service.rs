//! Server-side matchmaking without I/O.
//!
//! [`MatchmakingService`] owns the [`PlayerRegistry`] and the
//! [`RoomDirectory`]. Every entry point takes bytes or a connection id and
//! returns a [`Dispatch`]: the messages to send and the events to surface.
//! The async server feeds it from connection tasks; tests drive it
//! directly.

use bytes::Bytes;
use netsync_protocol::{
    ClientIncomingMessageType, EnterRoomResultCode, IncomingMessage, MessageType,
    OutgoingMessage, PlayerId, ProtocolError, RefreshLobbyRooms, RoomOptions,
    ServerIncomingMessageType,
};
use netsync_room::{
    EnterKind, EnterOutcome, JoiningHook, RoomDirectory, RoomError, RoomFields, ServerRoom,
};
use netsync_session::{NetworkPlayer, PlayerRegistry, SessionError};
use netsync_transport::{ConnectionId, DeliveryMethod};

use crate::NetsyncError;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// One message for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ConnectionId,
    pub bytes: Bytes,
    pub delivery: DeliveryMethod,
}

/// Something the hosting application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    PlayerConnected { conn: ConnectionId, nickname: String },
    PlayerDisconnected { conn: ConnectionId },
    RoomCreated { name: String },
    RoomDestroyed { name: String },
    /// Payload of a `UserDataToHost` message.
    MessageFromClient { conn: ConnectionId, data: Bytes },
}

/// Everything a single service call produced.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub outbound: Vec<Outbound>,
    pub events: Vec<ServerEvent>,
}

impl Dispatch {
    fn send(&mut self, to: ConnectionId, bytes: Bytes) {
        self.outbound.push(Outbound {
            to,
            bytes,
            delivery: DeliveryMethod::ReliableOrdered,
        });
    }

    fn send_all(&mut self, to: impl IntoIterator<Item = ConnectionId>, bytes: Bytes) {
        for conn in to {
            self.send(conn, bytes.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }

    /// Messages addressed to `conn`, in send order.
    pub fn to(&self, conn: ConnectionId) -> impl Iterator<Item = &Outbound> {
        self.outbound.iter().filter(move |o| o.to == conn)
    }
}

fn client_message(kind: ClientIncomingMessageType) -> OutgoingMessage {
    let mut out = OutgoingMessage::data();
    out.write(&kind);
    out
}

fn lobby_refresh(kind: ClientIncomingMessageType, refresh: &RefreshLobbyRooms) -> Bytes {
    let mut out = client_message(kind);
    refresh.write(&mut out);
    out.freeze()
}

// ---------------------------------------------------------------------------
// MatchmakingService
// ---------------------------------------------------------------------------

/// Lobby and room bookkeeping for every connected player.
#[derive(Debug)]
pub struct MatchmakingService {
    registry: PlayerRegistry,
    directory: RoomDirectory,
}

impl MatchmakingService {
    /// Creates a service that admits hails for `application_key`.
    pub fn new(application_key: impl Into<String>) -> Self {
        Self {
            registry: PlayerRegistry::new(application_key),
            directory: RoomDirectory::new(),
        }
    }

    pub fn set_joining_hook(&mut self, hook: JoiningHook) {
        self.directory.set_joining_hook(hook);
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Server-side access to a player. Changes go out on the next flush.
    pub fn player_mut(&mut self, conn: ConnectionId) -> Option<&mut NetworkPlayer> {
        self.registry.get_mut(conn).map(|p| p.player_mut())
    }

    /// Server-side access to a room. Changes go out on the next flush.
    pub fn room_mut(&mut self, name: &str) -> Option<&mut ServerRoom> {
        self.directory.get_mut(name)
    }

    /// Registers the player a hail introduces and sends it the lobby.
    pub fn connect(
        &mut self,
        conn: ConnectionId,
        hail: &mut IncomingMessage,
    ) -> Result<Dispatch, NetsyncError> {
        let nickname = self.registry.connect(conn, hail)?.player().nickname().to_string();

        let mut dispatch = Dispatch::default();
        let refresh = RefreshLobbyRooms::absolute(self.directory.visible_rooms());
        dispatch.send(
            conn,
            lobby_refresh(ClientIncomingMessageType::RefreshRoomsInLobby, &refresh),
        );
        dispatch
            .events
            .push(ServerEvent::PlayerConnected { conn, nickname });
        Ok(dispatch)
    }

    /// Removes a player, taking it out of its room first.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Result<Dispatch, NetsyncError> {
        let mut dispatch = Dispatch::default();
        let in_room = self
            .registry
            .get(conn)
            .ok_or(SessionError::NotFound(conn))?
            .room()
            .is_some();
        if in_room {
            self.leave_current_room(conn, &mut dispatch)?;
        }
        self.registry.disconnect(conn)?;
        dispatch.events.push(ServerEvent::PlayerDisconnected { conn });
        Ok(dispatch)
    }

    /// Handles one server-bound message from `conn`.
    ///
    /// A returned error means the message was dropped. The connection
    /// stays usable.
    pub fn handle_message(
        &mut self,
        conn: ConnectionId,
        data: Bytes,
    ) -> Result<Dispatch, NetsyncError> {
        let mut input = IncomingMessage::new(data)?;
        if input.message_type() != MessageType::Data {
            return Err(ProtocolError::InvalidMessage(format!(
                "unexpected {} message after hail",
                input.message_type()
            ))
            .into());
        }
        if self.registry.get(conn).is_none() {
            return Err(SessionError::NotFound(conn).into());
        }

        let kind: ServerIncomingMessageType = input.read()?;
        tracing::debug!(%conn, %kind, "message received");

        let mut dispatch = Dispatch::default();
        match kind {
            ServerIncomingMessageType::SetPlayerProperties => {
                self.set_player_properties(conn, input, &mut dispatch)?;
            }
            ServerIncomingMessageType::SetRoomProperties => {
                self.set_room_properties(conn, input, &mut dispatch)?;
            }
            ServerIncomingMessageType::CreateRoomRequest
            | ServerIncomingMessageType::JoinOrCreateRoomRequest => {
                let options = RoomOptions::read(&mut input)?;
                let player = self
                    .registry
                    .get_mut(conn)
                    .ok_or(SessionError::NotFound(conn))?;
                let outcome = if kind == ServerIncomingMessageType::CreateRoomRequest {
                    self.directory.create(&options, &mut input, player)?
                } else {
                    self.directory.join_or_create(&options, &mut input, player)?
                };
                self.finish_enter(conn, &options.name, outcome, &mut dispatch)?;
            }
            ServerIncomingMessageType::JoinRoomRequest => {
                let options = RoomOptions::read(&mut input)?;
                let player = self
                    .registry
                    .get_mut(conn)
                    .ok_or(SessionError::NotFound(conn))?;
                let outcome = self.directory.join(&options.name, player)?;
                self.finish_enter(conn, &options.name, outcome, &mut dispatch)?;
            }
            ServerIncomingMessageType::LeaveRoomRequest => {
                self.leave_current_room(conn, &mut dispatch)?;
                let refresh = RefreshLobbyRooms::absolute(self.directory.visible_rooms());
                dispatch.send(
                    conn,
                    lobby_refresh(ClientIncomingMessageType::LeaveResponse, &refresh),
                );
            }
            ServerIncomingMessageType::UserDataToHost => {
                let data = input.read_remaining()?;
                dispatch
                    .events
                    .push(ServerEvent::MessageFromClient { conn, data });
            }
            ServerIncomingMessageType::UserDataToRoom => {
                let (room, sender) = self.current_room(conn)?;
                let mut out = client_message(ClientIncomingMessageType::UserDataFromRoom);
                out.write(&sender).append_remaining(&input);
                dispatch.send_all(room.connections_except(sender), out.freeze());
            }
            ServerIncomingMessageType::UserDataToOtherClient => {
                let target: PlayerId = input.read()?;
                let (room, sender) = self.current_room(conn)?;
                let to = room
                    .connection(target)
                    .ok_or(RoomError::UnknownPlayer(target))?;
                let mut out =
                    client_message(ClientIncomingMessageType::UserDataFromOtherClient);
                out.write(&sender).append_remaining(&input);
                dispatch.send(to, out.freeze());
            }
        }
        Ok(dispatch)
    }

    /// Sends pending player and room changes made on the server side.
    pub fn flush(&mut self) -> Dispatch {
        let mut dispatch = Dispatch::default();

        let dirty: Vec<ConnectionId> = self
            .registry
            .iter()
            .filter(|p| p.player().need_sync())
            .map(|p| p.conn())
            .collect();
        for conn in dirty {
            let Some(player) = self.registry.get_mut(conn) else {
                continue;
            };
            let mut delta = OutgoingMessage::data();
            player.player_mut().write_sync(&mut delta, false);

            let mut local = client_message(ClientIncomingMessageType::RefreshLocalPlayerProperties);
            local.append_message(&delta);
            dispatch.send(conn, local.freeze());

            let (Some(room), Some(id)) = (player.room(), player.id()) else {
                continue;
            };
            if let Some(room) = self.directory.get(room) {
                let mut other =
                    client_message(ClientIncomingMessageType::RefreshOtherPlayerProperties);
                other.write(&id).append_message(&delta);
                dispatch.send_all(room.connections_except(id), other.freeze());
            }
        }

        let lobby = self.registry.players_in_lobby();
        for room in self.directory.rooms_mut() {
            if room.need_sync() {
                let mut out =
                    client_message(ClientIncomingMessageType::RefreshCurrentRoomProperties);
                let fields = room.write_sync(&mut out, false);
                dispatch.send_all(room.connections(), out.freeze());
                if fields.contains(RoomFields::IS_VISIBLE) {
                    announce_visibility(room, &lobby, &mut dispatch);
                    continue;
                }
            }
            if room.is_visible() && room.info_needs_sync() {
                announce_info(room, &lobby, &mut dispatch);
            }
        }

        if !dispatch.is_empty() {
            tracing::debug!(messages = dispatch.outbound.len(), "flushed pending changes");
        }
        dispatch
    }

    /// Wraps an application payload as `UserDataFromHost`.
    pub fn send_to_client(&self, conn: ConnectionId, data: &[u8]) -> Result<Outbound, NetsyncError> {
        if self.registry.get(conn).is_none() {
            return Err(SessionError::NotFound(conn).into());
        }
        let mut out = client_message(ClientIncomingMessageType::UserDataFromHost);
        out.write_raw(data);
        Ok(Outbound {
            to: conn,
            bytes: out.freeze(),
            delivery: DeliveryMethod::ReliableOrdered,
        })
    }

    // -- Message handlers --

    fn set_player_properties(
        &mut self,
        conn: ConnectionId,
        input: IncomingMessage,
        dispatch: &mut Dispatch,
    ) -> Result<(), NetsyncError> {
        let player = self
            .registry
            .get_mut(conn)
            .ok_or(SessionError::NotFound(conn))?;
        let mut applied = input.clone();
        let fields = player.player_mut().read_from(&mut applied)?;
        tracing::debug!(%conn, ?fields, "player properties updated");

        let (Some(room), Some(id)) = (player.room(), player.id()) else {
            return Ok(());
        };
        let room = self
            .directory
            .get(room)
            .ok_or_else(|| RoomError::NotFound(room.to_string()))?;
        let mut out = client_message(ClientIncomingMessageType::RefreshOtherPlayerProperties);
        out.write(&id).append_remaining(&input);
        dispatch.send_all(room.connections_except(id), out.freeze());
        Ok(())
    }

    fn set_room_properties(
        &mut self,
        conn: ConnectionId,
        input: IncomingMessage,
        dispatch: &mut Dispatch,
    ) -> Result<(), NetsyncError> {
        let player = self
            .registry
            .get(conn)
            .ok_or(SessionError::NotFound(conn))?;
        let (Some(name), Some(sender)) = (player.room(), player.id()) else {
            return Err(RoomError::NotInRoom.into());
        };
        let lobby = self.registry.players_in_lobby();
        let room = self
            .directory
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;

        let mut applied = input.clone();
        let fields = room.read_fields(&mut applied)?;
        tracing::debug!(%conn, room = room.name(), ?fields, "room properties updated");

        let mut out = client_message(ClientIncomingMessageType::RefreshCurrentRoomProperties);
        out.append_remaining(&input);
        dispatch.send_all(room.connections_except(sender), out.freeze());

        if fields.contains(RoomFields::IS_VISIBLE) {
            announce_visibility(room, &lobby, dispatch);
        } else if room.is_visible() && room.info_needs_sync() {
            announce_info(room, &lobby, dispatch);
        }
        Ok(())
    }

    /// Answers a create or join and tells everyone else what changed.
    fn finish_enter(
        &mut self,
        conn: ConnectionId,
        name: &str,
        outcome: EnterOutcome,
        dispatch: &mut Dispatch,
    ) -> Result<(), NetsyncError> {
        let response_kind = match outcome.kind {
            EnterKind::Create => ClientIncomingMessageType::CreateResponse,
            EnterKind::Join => ClientIncomingMessageType::JoinResponse,
        };
        let mut response = client_message(response_kind);
        response.write(&outcome.code);
        tracing::info!(%conn, room = %name, kind = ?outcome.kind, code = %outcome.code, "enter room answered");

        if outcome.code != EnterRoomResultCode::Succeed {
            dispatch.send(conn, response.freeze());
            return Ok(());
        }

        let lobby = self.registry.players_in_lobby();
        let room = self
            .directory
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;

        match outcome.kind {
            EnterKind::Create => {
                dispatch.send(conn, response.freeze());
                dispatch.events.push(ServerEvent::RoomCreated {
                    name: name.to_string(),
                });
                if room.is_visible() {
                    let refresh = RefreshLobbyRooms::include(room.take_info_snapshot());
                    dispatch.send_all(
                        lobby,
                        lobby_refresh(ClientIncomingMessageType::RefreshRoomsInLobby, &refresh),
                    );
                }
            }
            EnterKind::Join => {
                let joiner = self
                    .registry
                    .get(conn)
                    .and_then(|p| p.id())
                    .ok_or(SessionError::NotFound(conn))?;
                room.write_join_data(&mut response, joiner, &self.registry)?;
                dispatch.send(conn, response.freeze());

                let mut sync = client_message(ClientIncomingMessageType::RefreshPlayersInRoom);
                room.write_player_list_sync(&mut sync, &self.registry)?;
                dispatch.send_all(room.connections_except(joiner), sync.freeze());

                if room.is_visible() && room.info_needs_sync() {
                    announce_info(room, &lobby, dispatch);
                }
            }
        }
        Ok(())
    }

    /// Takes `conn` out of its room and notifies the remaining members
    /// and the lobby. The leaver itself is not notified here.
    fn leave_current_room(
        &mut self,
        conn: ConnectionId,
        dispatch: &mut Dispatch,
    ) -> Result<(), NetsyncError> {
        let player = self
            .registry
            .get_mut(conn)
            .ok_or(SessionError::NotFound(conn))?;
        let outcome = self.directory.leave(player)?;

        let lobby: Vec<ConnectionId> = self
            .registry
            .players_in_lobby()
            .into_iter()
            .filter(|c| *c != conn)
            .collect();

        if outcome.destroyed {
            if outcome.was_visible {
                let refresh = RefreshLobbyRooms::remove(outcome.room.clone());
                dispatch.send_all(
                    lobby,
                    lobby_refresh(ClientIncomingMessageType::RefreshRoomsInLobby, &refresh),
                );
            }
            dispatch.events.push(ServerEvent::RoomDestroyed { name: outcome.room });
            return Ok(());
        }

        let room = self
            .directory
            .get_mut(&outcome.room)
            .ok_or_else(|| RoomError::NotFound(outcome.room.clone()))?;
        let mut sync = client_message(ClientIncomingMessageType::RefreshPlayersInRoom);
        room.write_player_list_sync(&mut sync, &self.registry)?;
        dispatch.send_all(room.connections(), sync.freeze());

        if room.is_visible() && room.info_needs_sync() {
            announce_info(room, &lobby, dispatch);
        }
        Ok(())
    }

    /// The room `conn` is in and its id there.
    fn current_room(&self, conn: ConnectionId) -> Result<(&ServerRoom, PlayerId), NetsyncError> {
        let player = self
            .registry
            .get(conn)
            .ok_or(SessionError::NotFound(conn))?;
        let (Some(name), Some(id)) = (player.room(), player.id()) else {
            return Err(RoomError::NotInRoom.into());
        };
        let room = self
            .directory
            .get(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;
        Ok((room, id))
    }
}

/// Tells the lobby a room appeared or disappeared after a visibility
/// change.
fn announce_visibility(room: &mut ServerRoom, lobby: &[ConnectionId], dispatch: &mut Dispatch) {
    let snapshot = room.take_info_snapshot();
    let refresh = if room.is_visible() {
        RefreshLobbyRooms::include(snapshot)
    } else {
        RefreshLobbyRooms::remove(room.name())
    };
    dispatch.send_all(
        lobby.iter().copied(),
        lobby_refresh(ClientIncomingMessageType::RefreshRoomsInLobby, &refresh),
    );
}

/// Sends the changed descriptor fields of a visible room to the lobby.
fn announce_info(room: &mut ServerRoom, lobby: &[ConnectionId], dispatch: &mut Dispatch) {
    let mut out = client_message(ClientIncomingMessageType::RefreshRoomInLobbyProperties);
    out.write(room.name());
    room.write_info_sync(&mut out);
    dispatch.send_all(lobby.iter().copied(), out.freeze());
}
