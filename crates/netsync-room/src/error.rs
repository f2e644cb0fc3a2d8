//! Error types for the room layer.
//!
//! Expected matchmaking outcomes (room full, missing, rejected) are
//! `EnterRoomResultCode` values, not errors.

use netsync_properties::PropertyError;
use netsync_protocol::{PlayerId, ProtocolError};
use netsync_session::SessionError;

use crate::ClientState;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room '{0}' not found")]
    NotFound(String),

    /// The player is not in any room.
    #[error("player is not in a room")]
    NotInRoom,

    /// The player is already in a room.
    #[error("player is already in room '{0}'")]
    AlreadyInRoom(String),

    /// A room message named a player the room does not know.
    #[error("player {0} is not in the room")]
    UnknownPlayer(PlayerId),

    /// The client state machine does not allow the requested step.
    #[error("cannot go from {from} to {to}")]
    InvalidTransition { from: ClientState, to: ClientState },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
