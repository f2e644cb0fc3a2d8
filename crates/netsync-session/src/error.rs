//! Error types for the session layer.

use netsync_properties::PropertyError;
use netsync_protocol::ProtocolError;
use netsync_transport::ConnectionId;

/// Errors that can occur while admitting or tracking players.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection already has a registered player.
    #[error("connection {0} already has a player")]
    AlreadyConnected(ConnectionId),

    /// No player is registered for the connection.
    #[error("no player registered for connection {0}")]
    NotFound(ConnectionId),

    /// The first message was not a well-formed hail.
    #[error("invalid hail: {0}")]
    InvalidHail(String),

    /// The hail names another application or client version.
    #[error("application mismatch: expected '{expected}', got '{found}'")]
    ApplicationMismatch { expected: String, found: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Property(#[from] PropertyError),
}
