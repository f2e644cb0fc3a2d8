//! Rooms and the lobby for netsync.
//!
//! # Key types
//!
//! - [`RoomDirectory`]: the server's rooms, with create / join / leave
//! - [`ServerRoom`]: one room's roster, fields, and join data
//! - [`LocalRoom`]: the client's view of the room it is in
//! - [`Lobby`]: the client's directory of visible rooms
//! - [`ClientState`]: the client's lifecycle state machine

mod directory;
mod error;
mod fields;
mod lobby;
mod local_room;
mod server_room;
mod state;

pub use directory::{EnterKind, EnterOutcome, JoiningHook, LeaveOutcome, RoomDirectory};
pub use error::RoomError;
pub use fields::RoomFields;
pub use lobby::{Lobby, LobbyChanges};
pub use local_room::{LocalRoom, RoomEvent};
pub use server_room::ServerRoom;
pub use state::ClientState;
