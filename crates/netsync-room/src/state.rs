//! The client-side matchmaking state machine.

use std::fmt;

use crate::RoomError;

/// Where a client stands in the connect / lobby / room lifecycle.
///
/// ```text
/// Disconnected → Connecting → InLobby ⇄ Joining → Joined → Leaving → InLobby
///                                 ▲         │
///                                 └─────────┘ (enter failed)
/// ```
///
/// Any state may drop to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    InLobby,
    Joining,
    Joined,
    Leaving,
}

impl ClientState {
    /// Returns `true` once the hail has been answered.
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }

    /// Returns `true` if the client may create or join a room.
    pub fn can_enter_room(self) -> bool {
        matches!(self, Self::InLobby)
    }

    /// Returns `true` while the client is a member of a room.
    pub fn is_in_room(self) -> bool {
        matches!(self, Self::Joined)
    }

    /// Returns `true` while a request awaits the server's answer.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Joining | Self::Leaving)
    }

    /// Returns `true` if moving to `target` is a valid step.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ClientState::*;
        match (self, target) {
            (_, Disconnected) => self != Disconnected,
            (Disconnected, Connecting) => true,
            (Connecting, InLobby) => true,
            (InLobby, Joining) => true,
            (Joining, Joined | InLobby) => true,
            (Joined, Leaving) => true,
            (Leaving, InLobby) => true,
            _ => false,
        }
    }

    /// Moves to `target`, or fails without changing state.
    pub fn transition(&mut self, target: Self) -> Result<(), RoomError> {
        if !self.can_transition_to(target) {
            return Err(RoomError::InvalidTransition {
                from: *self,
                to: target,
            });
        }
        tracing::debug!(from = %self, to = %target, "client state changed");
        *self = target;
        Ok(())
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
