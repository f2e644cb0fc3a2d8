//! Connections for netsync, and the delivery tiers they honor.
//!
//! The matchmaking layers never touch sockets. They see a [`Transport`]
//! that hands out connections and a [`Connection`] that moves whole
//! messages, each stamped with the [`DeliveryMethod`] the sender picked.
//! [`SequenceCounter`] and [`DeliveryFilter`] are the two halves a
//! transport uses to keep each tier's promise.
//!
//! The `websocket` feature (on by default) adds [`WebSocketTransport`]
//! and [`WebSocketConnection`] over `tokio-tungstenite`.

#![allow(async_fn_in_trait)]

mod delivery;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use delivery::{
    DeliveryFilter, DeliveryMethod, MAX_ORDERED_BACKLOG, SequenceCounter,
    sequence_greater_than, sequence_less_than,
};
pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{FRAME_HEADER_LEN, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Names one peer for the life of the process. The server keys players
/// by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Hands out a fresh id. Ids start at 1 and are never reused.
    pub fn allocate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The listening side: yields one [`Connection`] per peer.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops taking new peers. Open connections are left alone.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// One peer. Methods take `&self` so a connection can be shared between
/// a reading task and writers.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Sends one message on `delivery`'s tier.
    async fn send(&self, data: &[u8], delivery: DeliveryMethod) -> Result<(), Self::Error>;

    /// Next message the tier rules let through. Stale sequenced arrivals
    /// never show up here.
    ///
    /// Frames that cannot be decoded are dropped and the wait goes on.
    /// `Ok(None)` means the peer closed the connection.
    async fn recv(&self) -> Result<Option<Bytes>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).into_inner(), 7);
    }

    #[test]
    fn test_allocated_ids_are_distinct_and_increasing() {
        let a = ConnectionId::allocate();
        let b = ConnectionId::allocate();
        assert!(b > a);
        assert_ne!(a.into_inner(), 0);
    }
}
