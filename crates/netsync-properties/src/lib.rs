//! Replicated properties for netsync.
//!
//! - [`PropertyTable`]: a thread-safe map from one-byte keys to tagged
//!   [`Value`]s. It raises added/changed/removed events and replicates
//!   through deltas.
//! - [`PropertiesProvider`] and [`ProviderChain`]: who owns which table,
//!   and how a consumer finds the right one.
//! - [`PropertySync`]: a typed view of one key that queues change
//!   notifications for the update loop.
//!
//! ```text
//! network task: apply_delta ─▶ PropertyTable ─event─▶ PropertySync
//! update loop:                                 poll_event ◀─┘
//! ```

mod error;
mod key;
mod provider;
mod sync;
mod table;
mod value;

pub use error::{BindError, PropertyError};
pub use key::PropertyKey;
pub use provider::{
    BindContext, PropertiesProvider, ProviderChain, ProviderFilter, ProviderScope,
    RefreshSubscription,
};
pub use sync::{PropertySync, SyncEvent, SyncState};
pub use table::{
    MAX_KEYS, PropertyDelta, PropertyEvent, PropertyListener, PropertyTable, Subscription,
};
pub use value::{PropertyType, Serializable, Value, ValueKind};
