//! Error types for property tables and synchronizers.

use netsync_protocol::ProtocolError;

use crate::{ProviderFilter, ValueKind};

/// Errors from reading or writing a [`PropertyTable`](crate::PropertyTable).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// A local write hit a table that mirrors a remote player.
    #[error("property table is read-only")]
    ReadOnly,

    /// The stored value has a different type than the one requested.
    #[error("property {key} holds {found}, not {expected}")]
    TypeMismatch {
        key: u8,
        expected: ValueKind,
        found: ValueKind,
    },

    /// A tagged value started with a tag no value type uses.
    #[error("unknown property value tag {0}")]
    UnknownTag(u8),

    /// Adding `key` would push a table past its key limit.
    #[error("property table is full; cannot add key {key}")]
    TableFull { key: u8 },

    /// A synchronizer was read or written before it had a table.
    #[error("property synchronizer is not bound to a table")]
    NotBound,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Configuration errors raised while binding a synchronizer.
///
/// These are programming mistakes and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// More than one provider matches the filter among siblings.
    #[error("{count} providers match filter {filter} at the same level")]
    AmbiguousProvider { filter: ProviderFilter, count: usize },

    /// No provider in the chain matches the filter.
    #[error("no provider matches filter {0}")]
    ProviderNotFound(ProviderFilter),

    /// The key type is wider than one byte.
    #[error("property key type must be one byte wide, got {size}")]
    InvalidKeyType { size: usize },

    /// The filter was changed after the synchronizer was bound.
    #[error("provider filter cannot change once bound")]
    FilterLocked,

    /// The synchronizer was already disposed.
    #[error("property synchronizer is disposed")]
    Disposed,
}
