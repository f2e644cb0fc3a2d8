//! Client-side matchmaking without I/O.
//!
//! [`MatchmakingClient`] turns requests into message bytes and incoming
//! bytes into [`ClientEvent`]s. It tracks the lobby, the current room and
//! the local player, and walks the [`ClientState`] machine as answers
//! arrive. [`NetsyncClient`](crate::NetsyncClient) drives it over a real
//! connection.

use bytes::Bytes;
use netsync_properties::PropertyTable;
use netsync_protocol::{
    ClientIncomingMessageType, EnterRoomResultCode, IncomingMessage, OutgoingMessage,
    PlayerId, ProtocolError, RefreshLobbyRooms, RoomOptions, ServerIncomingMessageType,
};
use netsync_room::{ClientState, Lobby, LobbyChanges, LocalRoom, RoomError, RoomEvent, RoomFields};
use netsync_session::{NetworkPlayer, PlayerFields, write_hail};
use tokio::sync::oneshot;

use crate::{ClientConfig, NetsyncError};

/// Resolves with the server's answer to a create or join request, or
/// with `Aborted` if the connection drops first.
pub type EnterTicket = oneshot::Receiver<EnterRoomResultCode>;

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server answered the hail with the lobby.
    Connected,
    LobbyChanged(LobbyChanges),
    /// A visible room's descriptor changed.
    LobbyRoomUpdated(String),
    EnterRoomResult(EnterRoomResultCode),
    LeftRoom,
    RoomPropertiesChanged(RoomFields),
    Room(RoomEvent),
    LocalPlayerChanged(PlayerFields),
    PlayerChanged { id: PlayerId, fields: PlayerFields },
    MessageFromHost(Bytes),
    MessageFromRoom { sender: PlayerId, data: Bytes },
    MessageFromPlayer { sender: PlayerId, data: Bytes },
    Disconnected,
}

/// A create or join waiting for its response.
#[derive(Debug)]
struct PendingEnter {
    options: RoomOptions,
    /// Room properties sent with a create, applied locally on success.
    initial_properties: IncomingMessage,
    ticket: oneshot::Sender<EnterRoomResultCode>,
}

/// The creator's room: its own options plus the properties it sent.
fn created_room(pending: &PendingEnter) -> Result<LocalRoom, NetsyncError> {
    let room = LocalRoom::from_options(&pending.options);
    let mut initial = pending.initial_properties.clone();
    room.properties().apply_delta(&mut initial)?;
    Ok(room)
}

fn server_message(kind: ServerIncomingMessageType) -> OutgoingMessage {
    let mut out = OutgoingMessage::data();
    out.write(&kind);
    out
}

/// One client's view of the matchmaking session.
#[derive(Debug)]
pub struct MatchmakingClient {
    application_key: String,
    state: ClientState,
    player: NetworkPlayer,
    lobby: Lobby,
    room: Option<LocalRoom>,
    pending: Option<PendingEnter>,
}

impl MatchmakingClient {
    pub fn new(config: &ClientConfig) -> Result<Self, NetsyncError> {
        config.validate()?;
        let mut player = NetworkPlayer::local();
        if let Some(nickname) = &config.nickname {
            player.set_nickname(nickname.clone())?;
        }
        Ok(Self {
            application_key: config.application_key(),
            state: ClientState::Disconnected,
            player,
            lobby: Lobby::new(),
            room: None,
            pending: None,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn player(&self) -> &NetworkPlayer {
        &self.player
    }

    /// The local player. Changes go out on the next [`flush`](Self::flush).
    pub fn player_mut(&mut self) -> &mut NetworkPlayer {
        &mut self.player
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn room(&self) -> Option<&LocalRoom> {
        self.room.as_ref()
    }

    /// The current room. Changes go out on the next [`flush`](Self::flush).
    pub fn room_mut(&mut self) -> Option<&mut LocalRoom> {
        self.room.as_mut()
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Starts a session and returns the hail to send.
    pub fn begin_connect(&mut self) -> Result<Bytes, NetsyncError> {
        self.state.transition(ClientState::Connecting)?;
        let hail = write_hail(&self.application_key, &self.player);
        // The hail carried every field.
        self.player.write_sync(&mut OutgoingMessage::data(), false);
        Ok(hail.freeze())
    }

    pub fn create_room(
        &mut self,
        options: RoomOptions,
        initial_properties: Option<&PropertyTable>,
    ) -> Result<(Bytes, EnterTicket), NetsyncError> {
        self.enter(ServerIncomingMessageType::CreateRoomRequest, options, initial_properties)
    }

    pub fn join_or_create_room(
        &mut self,
        options: RoomOptions,
        initial_properties: Option<&PropertyTable>,
    ) -> Result<(Bytes, EnterTicket), NetsyncError> {
        self.enter(
            ServerIncomingMessageType::JoinOrCreateRoomRequest,
            options,
            initial_properties,
        )
    }

    pub fn join_room(&mut self, name: &str) -> Result<(Bytes, EnterTicket), NetsyncError> {
        self.enter(ServerIncomingMessageType::JoinRoomRequest, RoomOptions::named(name), None)
    }

    fn enter(
        &mut self,
        kind: ServerIncomingMessageType,
        options: RoomOptions,
        initial_properties: Option<&PropertyTable>,
    ) -> Result<(Bytes, EnterTicket), NetsyncError> {
        self.state.transition(ClientState::Joining)?;

        let mut request = server_message(kind);
        options.write(&mut request);

        let mut snapshot = OutgoingMessage::data();
        match initial_properties {
            Some(table) => table.write_snapshot(&mut snapshot),
            None => PropertyTable::new(false).write_snapshot(&mut snapshot),
        }
        if kind != ServerIncomingMessageType::JoinRoomRequest {
            request.append_message(&snapshot);
        }

        tracing::debug!(room = %options.name, %kind, "enter room requested");
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingEnter {
            options,
            initial_properties: IncomingMessage::from(snapshot),
            ticket: tx,
        });
        Ok((request.freeze(), rx))
    }

    pub fn leave_room(&mut self) -> Result<Bytes, NetsyncError> {
        self.state.transition(ClientState::Leaving)?;
        Ok(server_message(ServerIncomingMessageType::LeaveRoomRequest).freeze())
    }

    /// Wraps a payload for the server application.
    pub fn send_to_server(&self, data: &[u8]) -> Result<Bytes, NetsyncError> {
        if !self.state.is_connected() {
            return Err(NetsyncError::NotConnected);
        }
        let mut out = server_message(ServerIncomingMessageType::UserDataToHost);
        out.write_raw(data);
        Ok(out.freeze())
    }

    /// Wraps a payload for every other member of the room.
    pub fn send_to_room(&self, data: &[u8]) -> Result<Bytes, NetsyncError> {
        self.require_room()?;
        let mut out = server_message(ServerIncomingMessageType::UserDataToRoom);
        out.write_raw(data);
        Ok(out.freeze())
    }

    /// Wraps a payload for one room member.
    pub fn send_to_player(&self, target: PlayerId, data: &[u8]) -> Result<Bytes, NetsyncError> {
        self.require_room()?;
        let mut out = server_message(ServerIncomingMessageType::UserDataToOtherClient);
        out.write(&target).write_raw(data);
        Ok(out.freeze())
    }

    fn require_room(&self) -> Result<&LocalRoom, NetsyncError> {
        match &self.room {
            Some(room) if self.state.is_in_room() => Ok(room),
            _ => Err(RoomError::NotInRoom.into()),
        }
    }

    /// Messages carrying local player and room changes since the last
    /// flush. Empty until the lobby has arrived.
    pub fn flush(&mut self) -> Vec<Bytes> {
        let mut messages = Vec::new();
        if !self.state.is_connected() {
            return messages;
        }
        if self.player.need_sync() {
            let mut out = server_message(ServerIncomingMessageType::SetPlayerProperties);
            self.player.write_sync(&mut out, false);
            messages.push(out.freeze());
        }
        if let Some(room) = self.room.as_mut().filter(|r| r.need_sync()) {
            let mut out = server_message(ServerIncomingMessageType::SetRoomProperties);
            room.write_sync(&mut out, false);
            messages.push(out.freeze());
        }
        messages
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// Applies one client-bound message.
    pub fn handle_message(&mut self, data: Bytes) -> Result<Vec<ClientEvent>, NetsyncError> {
        let mut input = IncomingMessage::new(data)?;
        let kind: ClientIncomingMessageType = input.read()?;
        tracing::debug!(%kind, state = %self.state, "message received");

        let mut events = Vec::new();
        match kind {
            ClientIncomingMessageType::RefreshRoomsInLobby => {
                let refresh = RefreshLobbyRooms::read(&mut input)?;
                if self.state == ClientState::Connecting {
                    self.state.transition(ClientState::InLobby)?;
                    events.push(ClientEvent::Connected);
                }
                let changes = self.lobby.apply_refresh(refresh);
                if !changes.is_empty() {
                    events.push(ClientEvent::LobbyChanged(changes));
                }
            }
            ClientIncomingMessageType::RefreshRoomInLobbyProperties => {
                if let Some(name) = self.lobby.apply_room_update(&mut input)? {
                    events.push(ClientEvent::LobbyRoomUpdated(name));
                }
            }
            ClientIncomingMessageType::RefreshCurrentRoomProperties => {
                let room = self.room.as_mut().ok_or(RoomError::NotInRoom)?;
                let fields = room.read_fields(&mut input)?;
                events.push(ClientEvent::RoomPropertiesChanged(fields));
            }
            ClientIncomingMessageType::RefreshPlayersInRoom => {
                let room = self.room.as_mut().ok_or(RoomError::NotInRoom)?;
                let changes = room.read_player_list_sync(&mut input)?;
                events.extend(changes.into_iter().map(ClientEvent::Room));
            }
            ClientIncomingMessageType::RefreshLocalPlayerProperties => {
                let fields = self.player.read_from(&mut input)?;
                events.push(ClientEvent::LocalPlayerChanged(fields));
            }
            ClientIncomingMessageType::RefreshOtherPlayerProperties => {
                let room = self.room.as_mut().ok_or(RoomError::NotInRoom)?;
                let (id, fields) = room.read_player_properties(&mut input)?;
                events.push(ClientEvent::PlayerChanged { id, fields });
            }
            ClientIncomingMessageType::CreateResponse => {
                let code: EnterRoomResultCode = input.read()?;
                let pending = self.take_pending(kind)?;
                let room = if code.is_success() {
                    created_room(&pending).map(Some)
                } else {
                    Ok(None)
                };
                events.push(self.finish_enter(pending, code, room)?);
            }
            ClientIncomingMessageType::JoinResponse => {
                let code: EnterRoomResultCode = input.read()?;
                let pending = self.take_pending(kind)?;
                let room = if code.is_success() {
                    LocalRoom::from_join_data(&pending.options, &mut input)
                        .map(Some)
                        .map_err(NetsyncError::from)
                } else {
                    Ok(None)
                };
                events.push(self.finish_enter(pending, code, room)?);
            }
            ClientIncomingMessageType::LeaveResponse => {
                let refresh = RefreshLobbyRooms::read(&mut input)?;
                self.state.transition(ClientState::InLobby)?;
                self.room = None;
                self.player.set_id(None);
                events.push(ClientEvent::LeftRoom);
                let changes = self.lobby.apply_refresh(refresh);
                if !changes.is_empty() {
                    events.push(ClientEvent::LobbyChanged(changes));
                }
            }
            ClientIncomingMessageType::UserDataFromHost => {
                events.push(ClientEvent::MessageFromHost(input.read_remaining()?));
            }
            ClientIncomingMessageType::UserDataFromRoom => {
                let sender: PlayerId = input.read()?;
                let data = input.read_remaining()?;
                events.push(ClientEvent::MessageFromRoom { sender, data });
            }
            ClientIncomingMessageType::UserDataFromOtherClient => {
                let sender: PlayerId = input.read()?;
                let data = input.read_remaining()?;
                events.push(ClientEvent::MessageFromPlayer { sender, data });
            }
        }
        Ok(events)
    }

    /// Resets to `Disconnected`. A pending enter resolves as `Aborted`.
    pub fn disconnected(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if let Some(pending) = self.pending.take() {
            let _ = pending.ticket.send(EnterRoomResultCode::Aborted);
            events.push(ClientEvent::EnterRoomResult(EnterRoomResultCode::Aborted));
        }
        self.room = None;
        self.player.set_id(None);
        self.lobby.clear();
        if self.state != ClientState::Disconnected {
            self.state = ClientState::Disconnected;
            events.push(ClientEvent::Disconnected);
        }
        events
    }

    fn take_pending(&mut self, kind: ClientIncomingMessageType) -> Result<PendingEnter, NetsyncError> {
        match self.pending.take() {
            Some(pending) if self.state == ClientState::Joining => Ok(pending),
            other => {
                self.pending = other;
                Err(ProtocolError::InvalidMessage(format!("unexpected {kind}")).into())
            }
        }
    }

    /// Settles a create or join. A response whose room data cannot be
    /// read counts as `Aborted`.
    fn finish_enter(
        &mut self,
        pending: PendingEnter,
        code: EnterRoomResultCode,
        room: Result<Option<LocalRoom>, NetsyncError>,
    ) -> Result<ClientEvent, NetsyncError> {
        let (code, room, error) = match room {
            Ok(room) => (code, room, None),
            Err(e) => (EnterRoomResultCode::Aborted, None, Some(e)),
        };

        match room {
            Some(room) => {
                self.state.transition(ClientState::Joined)?;
                self.player.set_id(Some(room.local_player_id()));
                tracing::info!(room = room.name(), player = %room.local_player_id(), "entered room");
                self.room = Some(room);
            }
            None => {
                self.state.transition(ClientState::InLobby)?;
                tracing::info!(room = %pending.options.name, %code, "enter room failed");
            }
        }
        let _ = pending.ticket.send(code);

        match error {
            Some(e) => Err(e),
            None => Ok(ClientEvent::EnterRoomResult(code)),
        }
    }
}
