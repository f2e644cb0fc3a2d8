//! One-byte message kinds of the matchmaking protocol.
//!
//! Client-bound and server-bound kinds live in independent namespaces:
//! the same byte means different things depending on which side reads
//! it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{IncomingMessage, OutgoingMessage, ProtocolError, WireDecode, WireEncode};

wire_enum! {
    /// Kinds a client receives from the server.
    pub enum ClientIncomingMessageType ("client message") {
        RefreshRoomsInLobby = 0,
        RefreshRoomInLobbyProperties = 1,
        RefreshCurrentRoomProperties = 2,
        RefreshPlayersInRoom = 3,
        RefreshLocalPlayerProperties = 4,
        RefreshOtherPlayerProperties = 5,
        JoinResponse = 6,
        CreateResponse = 7,
        LeaveResponse = 8,
        UserDataFromHost = 9,
        UserDataFromRoom = 10,
        UserDataFromOtherClient = 11,
    }
}

wire_enum! {
    /// Kinds the server receives from a client.
    pub enum ServerIncomingMessageType ("server message") {
        SetPlayerProperties = 0,
        SetRoomProperties = 1,
        CreateRoomRequest = 2,
        JoinOrCreateRoomRequest = 3,
        JoinRoomRequest = 4,
        LeaveRoomRequest = 5,
        UserDataToHost = 6,
        UserDataToRoom = 7,
        UserDataToOtherClient = 8,
    }
}

wire_enum! {
    /// Outcome of a create or join request.
    ///
    /// Rejections are ordinary results, not errors.
    pub enum EnterRoomResultCode ("enter-room result") {
        Succeed = 0,
        RoomNotExists = 1,
        RoomAlreadyExists = 2,
        RoomIsFull = 3,
        /// A server-side joining hook refused the player.
        Rejected = 4,
        /// The client gave up waiting, usually on disconnect.
        Aborted = 5,
    }
}

impl EnterRoomResultCode {
    pub fn is_success(self) -> bool {
        self == EnterRoomResultCode::Succeed
    }
}

/// A player's id inside a room. Ids start at [`PlayerId::FIRST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub i32);

impl PlayerId {
    pub const FIRST: PlayerId = PlayerId(0);

    /// The id after this one.
    pub fn next(self) -> PlayerId {
        PlayerId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

impl WireEncode for PlayerId {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.0);
    }
}

impl WireDecode for PlayerId {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(PlayerId(input.read()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_kinds_are_dense_from_zero() {
        for (index, kind) in ClientIncomingMessageType::ALL.iter().enumerate() {
            assert_eq!(kind.as_u8() as usize, index);
        }
        assert_eq!(ClientIncomingMessageType::ALL.len(), 12);
    }

    #[test]
    fn test_server_kinds_are_dense_from_zero() {
        for (index, kind) in ServerIncomingMessageType::ALL.iter().enumerate() {
            assert_eq!(kind.as_u8() as usize, index);
        }
        assert_eq!(ServerIncomingMessageType::ALL.len(), 9);
    }

    #[test]
    fn test_out_of_range_kind_is_unrecognized() {
        let err = ServerIncomingMessageType::try_from(9).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnrecognizedMessageKind {
                namespace: "server message",
                value: 9,
            }
        );
        assert!(ClientIncomingMessageType::try_from(200).is_err());
        assert!(EnterRoomResultCode::try_from(6).is_err());
    }

    #[test]
    fn test_kind_read_from_message() {
        let mut message = OutgoingMessage::data();
        message
            .write(&ClientIncomingMessageType::JoinResponse)
            .write(&EnterRoomResultCode::RoomIsFull)
            .write(&42u8);

        let mut incoming = IncomingMessage::from(message);
        assert_eq!(
            incoming.read::<ClientIncomingMessageType>().unwrap(),
            ClientIncomingMessageType::JoinResponse
        );
        assert_eq!(
            incoming.read::<EnterRoomResultCode>().unwrap(),
            EnterRoomResultCode::RoomIsFull
        );
        let err = incoming.read::<EnterRoomResultCode>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnrecognizedMessageKind { value: 42, .. }));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(EnterRoomResultCode::Aborted.to_string(), "Aborted");
        assert_eq!(
            ServerIncomingMessageType::UserDataToOtherClient.to_string(),
            "UserDataToOtherClient"
        );
    }

    #[test]
    fn test_player_id_display_and_next() {
        assert_eq!(PlayerId::FIRST.to_string(), "P-0");
        assert_eq!(PlayerId::FIRST.next(), PlayerId(1));
    }
}
