//! Player identity and the connected-player registry for netsync.
//!
//! 1. **Players**: [`NetworkPlayer`] holds a nickname and a replicated
//!    property table, with [`PlayerFields`] naming what a delta carries.
//! 2. **Hail**: [`write_hail`] and [`read_hail`] introduce a player on a
//!    new connection and check the application key.
//! 3. **Registry**: [`PlayerRegistry`] tracks every admitted player and
//!    the room it is in.
//!
//! ```text
//! Room layer (above)     ← moves ServerPlayers between lobby and rooms
//!     ↕
//! Session layer (here)   ← who is connected, under which nickname
//!     ↕
//! Protocol / properties  ← wire codec and property tables
//! ```

mod error;
mod hail;
mod player;
mod registry;

pub use error::SessionError;
pub use hail::{application_key, read_hail, write_hail};
pub use player::{NetworkPlayer, PlayerFields};
pub use registry::{PlayerRegistry, ServerPlayer};
