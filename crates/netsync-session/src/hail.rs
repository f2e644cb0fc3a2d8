//! The hail: the first message a client sends on a new connection.
//!
//! ```text
//! [MessageType::Hail][string "<id>.<version>"][u8 SetPlayerProperties][player data]
//! ```

use netsync_protocol::{IncomingMessage, MessageType, OutgoingMessage, ServerIncomingMessageType};

use crate::{NetworkPlayer, SessionError};

/// Joins an application identifier and a client version the way the
/// hail carries them.
pub fn application_key(identifier: &str, version: &str) -> String {
    format!("{identifier}.{version}")
}

/// Builds the hail for a local player.
pub fn write_hail(application_key: &str, player: &NetworkPlayer) -> OutgoingMessage {
    let mut out = OutgoingMessage::new(MessageType::Hail);
    out.write(application_key)
        .write(&ServerIncomingMessageType::SetPlayerProperties);
    player.write_to(&mut out);
    out
}

/// Validates a hail and reads the player it introduces.
///
/// The returned player is the server's writable copy.
pub fn read_hail(
    input: &mut IncomingMessage,
    expected_key: &str,
) -> Result<NetworkPlayer, SessionError> {
    if input.message_type() != MessageType::Hail {
        return Err(SessionError::InvalidHail(format!(
            "expected a hail, got {}",
            input.message_type()
        )));
    }

    let found: String = input.read()?;
    if found != expected_key {
        return Err(SessionError::ApplicationMismatch {
            expected: expected_key.to_string(),
            found,
        });
    }

    let kind: ServerIncomingMessageType = input
        .read()
        .map_err(|e| SessionError::InvalidHail(e.to_string()))?;
    if kind != ServerIncomingMessageType::SetPlayerProperties {
        return Err(SessionError::InvalidHail(format!(
            "hail must carry {}, got {kind}",
            ServerIncomingMessageType::SetPlayerProperties
        )));
    }

    let mut player = NetworkPlayer::server();
    player.read_from(input)?;
    Ok(player)
}
