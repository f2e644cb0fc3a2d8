//! Wire protocol for netsync.
//!
//! This crate defines how bytes become typed messages and back:
//!
//! - **Messages** ([`OutgoingMessage`], [`IncomingMessage`]): bit-level
//!   buffers whose first byte is a [`MessageType`] discriminator.
//! - **Wire types** ([`WireEncode`], [`WireDecode`]): fixed encodings for
//!   primitives, strings, arrays, and composites such as [`Color`] and
//!   [`TimeSpan`].
//! - **Catalog** ([`ClientIncomingMessageType`],
//!   [`ServerIncomingMessageType`], [`EnterRoomResultCode`]): the
//!   one-byte message kinds of the matchmaking protocol.
//! - **Lobby** ([`RoomInfo`], [`RoomOptions`], [`RefreshLobbyRooms`]):
//!   room descriptors as the lobby sees them.
//!
//! The protocol layer knows nothing about connections or rooms. It only
//! reads and writes.
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Room / Properties
//! ```

/// Declares a one-byte wire enumeration.
///
/// Generates the enum plus `ALL`, `as_u8`, `TryFrom<u8>` (failing with
/// [`ProtocolError::UnrecognizedMessageKind`]), `Display`, and the
/// [`WireEncode`]/[`WireDecode`] impls.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($namespace:literal) {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Every kind, in discriminator order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// The discriminator byte.
            pub const fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = $crate::ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )+
                    _ => Err($crate::ProtocolError::UnrecognizedMessageKind {
                        namespace: $namespace,
                        value,
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( $name::$variant => f.write_str(stringify!($variant)), )+
                }
            }
        }

        impl $crate::WireEncode for $name {
            fn encode(&self, out: &mut $crate::OutgoingMessage) {
                out.write(&self.as_u8());
            }
        }

        impl $crate::WireDecode for $name {
            fn decode(
                input: &mut $crate::IncomingMessage,
            ) -> Result<Self, $crate::ProtocolError> {
                let value: u8 = input.read()?;
                $name::try_from(value)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod catalog;
mod error;
mod lobby;
mod message;
mod wire;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use catalog::{
    ClientIncomingMessageType, EnterRoomResultCode, PlayerId,
    ServerIncomingMessageType,
};
pub use error::ProtocolError;
pub use lobby::{RefreshLobbyRooms, RoomInfo, RoomInfoFields, RoomOptions};
pub use message::{DISCRIMINATOR_LEN, IncomingMessage, MessageType, OutgoingMessage};
pub use wire::{
    Color, DateTime, NetworkEndpoint, NetworkSerializable, TimePrecision,
    TimeSpan, WireDecode, WireEncode,
};

/// Writes an application type through its [`NetworkSerializable`] impl.
pub fn write_serializable<T: NetworkSerializable>(out: &mut OutgoingMessage, value: &T) {
    value.write(out);
}

/// Reads an application type through its [`NetworkSerializable`] impl.
pub fn read_serializable<T: NetworkSerializable>(
    input: &mut IncomingMessage,
) -> Result<T, ProtocolError> {
    T::read(input)
}
