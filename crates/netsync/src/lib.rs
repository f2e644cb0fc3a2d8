//! # netsync
//!
//! Replicated properties and lobby/room matchmaking for networked
//! applications.
//!
//! A server keeps the authoritative list of players and rooms. Clients
//! connect with a hail, browse the lobby, create or join rooms, and see
//! player and room properties change as the owner or the server writes
//! them.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netsync::prelude::*;
//!
//! let server = NetsyncServer::builder()
//!     .config(ServerConfig::for_application("arena"))
//!     .bind("127.0.0.1:0")
//!     .build()
//!     .await?;
//! let addr = server.local_addr()?.to_string();
//! tokio::spawn(server.run());
//!
//! let (client, _events) =
//!     NetsyncClient::connect(&addr, ClientConfig::for_application("arena")).await?;
//! client.join_or_create_room(RoomOptions::named("room-1"), None).await?;
//! ```
//!
//! The matchmaking logic lives in two I/O-free state machines,
//! [`MatchmakingService`] and [`MatchmakingClient`]. The server and
//! client runtimes only move their bytes.

mod client;
mod config;
mod error;
mod handler;
pub mod logging;
mod runtime;
mod server;
mod service;

pub use client::{ClientEvent, EnterTicket, MatchmakingClient};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ConfigError, NetsyncError};
pub use runtime::NetsyncClient;
pub use server::{NetsyncServer, NetsyncServerBuilder, ServerHandle};
pub use service::{Dispatch, MatchmakingService, Outbound, ServerEvent};

pub use netsync_properties as properties;
pub use netsync_protocol as protocol;
pub use netsync_room as room;
pub use netsync_session as session;
pub use netsync_transport as transport;

/// Common imports for netsync applications.
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientEvent, NetsyncClient, NetsyncError, NetsyncServer, ServerConfig,
        ServerEvent, ServerHandle,
    };
    pub use netsync_properties::{PropertySync, PropertyTable};
    pub use netsync_protocol::{EnterRoomResultCode, PlayerId, RoomInfo, RoomOptions};
    pub use netsync_room::{ClientState, RoomEvent, RoomFields};
    pub use netsync_session::{NetworkPlayer, PlayerFields};
    pub use netsync_transport::ConnectionId;
}
