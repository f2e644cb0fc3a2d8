//! Unified error type for netsync.

use netsync_properties::{BindError, PropertyError};
use netsync_protocol::ProtocolError;
use netsync_room::RoomError;
use netsync_session::SessionError;
use netsync_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` variants let `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum NetsyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The peer did not answer in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The connection closed while a reply was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The request needs a connection the client does not have yet.
    #[error("not connected")]
    NotConnected,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::MalformedFrame("2 bytes".into());
        let netsync_err: NetsyncError = err.into();
        assert!(matches!(netsync_err, NetsyncError::Transport(_)));
        assert!(netsync_err.to_string().contains("2 bytes"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let netsync_err: NetsyncError = err.into();
        assert!(matches!(netsync_err, NetsyncError::Protocol(_)));
        assert_eq!(netsync_err.to_string(), "invalid message: bad");
    }

    #[test]
    fn test_from_room_error() {
        let netsync_err: NetsyncError = RoomError::NotFound("r".into()).into();
        assert!(matches!(netsync_err, NetsyncError::Room(_)));
    }

    #[test]
    fn test_config_error_wraps_json() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let netsync_err: NetsyncError = ConfigError::from(json_err).into();
        assert!(netsync_err.to_string().starts_with("invalid config JSON"));
    }
}
