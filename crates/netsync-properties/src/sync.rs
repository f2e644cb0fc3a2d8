//! Typed synchronizers over one key of one table.
//!
//! A [`PropertySync`] is the engine-facing end of a property. The
//! network side mutates tables on whatever task the transport runs on;
//! the synchronizer turns the events for its key into [`SyncEvent`]s on
//! an unbounded channel that the update loop drains with
//! [`poll_event`](PropertySync::poll_event). No engine code ever runs on
//! the network task.
//!
//! ```text
//! Unbound ──bind──▶ Bound ──dispose──▶ Disposed
//!    ▲                │
//!    └── provider swap rebinds in place
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::{
    BindContext, BindError, PropertiesProvider, PropertyError, PropertyEvent,
    PropertyKey, PropertyTable, PropertyType, ProviderChain, ProviderFilter,
    RefreshSubscription, Subscription,
};

/// Lifecycle of a [`PropertySync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Unbound,
    Bound,
    Disposed,
}

impl SyncState {
    pub fn is_bound(&self) -> bool {
        matches!(self, SyncState::Bound)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, SyncState::Disposed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Unbound => write!(f, "Unbound"),
            SyncState::Bound => write!(f, "Bound"),
            SyncState::Disposed => write!(f, "Disposed"),
        }
    }
}

/// A change to the synchronized key, queued for the update loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    AddedOrChanged,
    Removed,
}

struct TableBinding {
    table: Arc<PropertyTable>,
    subscription: Subscription,
}

struct ProviderBinding {
    provider: Arc<PropertiesProvider>,
    subscription: RefreshSubscription,
}

struct Binding {
    state: SyncState,
    provider: Option<ProviderBinding>,
    table: Option<TableBinding>,
}

/// State shared with the listeners registered on tables and providers.
struct Shared {
    key: AtomicU8,
    events: mpsc::UnboundedSender<SyncEvent>,
    binding: Mutex<Binding>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_table_event(&self, event: &PropertyEvent) {
        if event.key() != self.key.load(Ordering::Acquire) {
            return;
        }
        let queued = match event {
            PropertyEvent::Added(_) | PropertyEvent::Changed(_) => SyncEvent::AddedOrChanged,
            PropertyEvent::Removed(_) => SyncEvent::Removed,
        };
        // The receiver lives as long as the synchronizer; a send after
        // drop has nobody to tell.
        let _ = self.events.send(queued);
    }

    /// Queues `AddedOrChanged` if the key already holds a value.
    fn force_check(&self, binding: &Binding) {
        let key = self.key.load(Ordering::Acquire);
        if let Some(bound) = &binding.table {
            if bound.table.contains(key) {
                let _ = self.events.send(SyncEvent::AddedOrChanged);
            }
        }
    }

    /// Drops the table listener, then attaches to `table`.
    fn attach_table(self: &Arc<Self>, binding: &mut Binding, table: Option<Arc<PropertyTable>>) {
        if let Some(old) = binding.table.take() {
            old.table.unsubscribe(old.subscription);
        }
        if let Some(table) = table {
            let weak: Weak<Shared> = Arc::downgrade(self);
            let subscription = table.subscribe(move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_table_event(event);
                }
            });
            binding.table = Some(TableBinding {
                table,
                subscription,
            });
        }
    }

    fn detach(&self, binding: &mut Binding) {
        if let Some(old) = binding.provider.take() {
            old.provider.unsubscribe_refresh(old.subscription);
        }
        if let Some(old) = binding.table.take() {
            old.table.unsubscribe(old.subscription);
        }
    }
}

/// Binds key `K` of a provider's table to value type `V`.
pub struct PropertySync<K: PropertyKey, V: PropertyType> {
    key: K,
    filter: ProviderFilter,
    shared: Arc<Shared>,
    receiver: mpsc::UnboundedReceiver<SyncEvent>,
    _value: PhantomData<fn() -> V>,
}

impl<K: PropertyKey, V: PropertyType> fmt::Debug for PropertySync<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySync")
            .field("key", &self.key.to_byte())
            .field("filter", &self.filter)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<K: PropertyKey, V: PropertyType> PropertySync<K, V> {
    /// Creates an unbound synchronizer for `key`.
    ///
    /// Fails if `K` is wider than one byte.
    pub fn new(key: K) -> Result<Self, BindError> {
        let size = std::mem::size_of::<K>();
        if size != 1 {
            return Err(BindError::InvalidKeyType { size });
        }

        let (events, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            key,
            filter: ProviderFilter::Any,
            shared: Arc::new(Shared {
                key: AtomicU8::new(key.to_byte()),
                events,
                binding: Mutex::new(Binding {
                    state: SyncState::Unbound,
                    provider: None,
                    table: None,
                }),
            }),
            receiver,
            _value: PhantomData,
        })
    }

    /// Sets the filter before binding.
    pub fn with_filter(mut self, filter: ProviderFilter) -> Result<Self, BindError> {
        self.set_filter(filter)?;
        Ok(self)
    }

    pub fn state(&self) -> SyncState {
        self.shared.lock().state
    }

    pub fn key(&self) -> K {
        self.key
    }

    /// Changes the key. A bound synchronizer re-checks the new key at once.
    pub fn set_key(&mut self, key: K) {
        if self.key.to_byte() == key.to_byte() {
            return;
        }
        self.key = key;
        self.shared.key.store(key.to_byte(), Ordering::Release);
        let binding = self.shared.lock();
        if binding.state.is_bound() {
            self.shared.force_check(&binding);
        }
    }

    pub fn filter(&self) -> ProviderFilter {
        self.filter
    }

    /// Changes the filter. Only allowed while unbound.
    pub fn set_filter(&mut self, filter: ProviderFilter) -> Result<(), BindError> {
        match self.state() {
            SyncState::Unbound => {
                self.filter = filter;
                Ok(())
            }
            SyncState::Bound => Err(BindError::FilterLocked),
            SyncState::Disposed => Err(BindError::Disposed),
        }
    }

    /// Binds to `provider` and runs the forced check.
    ///
    /// Any previous binding is released first. The provider must be
    /// accepted by the filter.
    pub fn bind(&mut self, provider: Arc<PropertiesProvider>) -> Result<(), BindError> {
        if !self.filter.accepts(provider.scope()) {
            return Err(BindError::ProviderNotFound(self.filter));
        }

        let mut binding = self.shared.lock();
        if binding.state.is_disposed() {
            return Err(BindError::Disposed);
        }
        self.shared.detach(&mut binding);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let subscription = provider.subscribe_refresh(move |table| {
            if let Some(shared) = weak.upgrade() {
                let mut binding = shared.lock();
                if binding.state.is_bound() {
                    shared.attach_table(&mut binding, table);
                    shared.force_check(&binding);
                }
            }
        });
        let table = provider.table();
        binding.provider = Some(ProviderBinding {
            provider,
            subscription,
        });
        self.shared.attach_table(&mut binding, table);
        binding.state = SyncState::Bound;
        self.shared.force_check(&binding);

        tracing::debug!(key = self.key.to_byte(), filter = %self.filter, "property sync bound");
        Ok(())
    }

    /// Searches `chain` with the configured filter and binds.
    ///
    /// Returns `Ok(false)` when nothing was found in an editor context.
    pub fn resolve(&mut self, chain: &ProviderChain, context: BindContext) -> Result<bool, BindError> {
        if self.state().is_disposed() {
            return Err(BindError::Disposed);
        }
        match chain.resolve(self.filter, context)? {
            Some(provider) => {
                self.bind(provider)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-runs the forced check by hand.
    pub fn sync_now(&self) {
        let binding = self.shared.lock();
        self.shared.force_check(&binding);
    }

    /// Unsubscribes from everything. The synchronizer cannot be bound
    /// again.
    pub fn dispose(&mut self) {
        let mut binding = self.shared.lock();
        self.shared.detach(&mut binding);
        binding.state = SyncState::Disposed;
    }

    fn table(&self) -> Option<Arc<PropertyTable>> {
        self.shared
            .lock()
            .table
            .as_ref()
            .map(|bound| Arc::clone(&bound.table))
    }

    /// Whether the bound table holds the key.
    pub fn has_value(&self) -> bool {
        self.table()
            .is_some_and(|table| table.contains(self.key.to_byte()))
    }

    /// Reads the value; `V::default()` when the key is absent.
    pub fn value(&self) -> Result<V, PropertyError> {
        let table = self.table().ok_or(PropertyError::NotBound)?;
        table.get(self.key.to_byte())
    }

    /// Writes through to the table, which decides added or changed.
    pub fn set_value(&self, value: V) -> Result<(), PropertyError> {
        self.set_value_with(value, V::Options::default())
    }

    pub fn set_value_with(&self, value: V, options: V::Options) -> Result<(), PropertyError> {
        let table = self.table().ok_or(PropertyError::NotBound)?;
        table.set_with(self.key.to_byte(), value, options)
    }

    /// Takes the next queued change, if any.
    pub fn poll_event(&mut self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }

    /// Takes every queued change.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.poll_event()).collect()
    }
}

impl<K: PropertyKey, V: PropertyType> Drop for PropertySync<K, V> {
    fn drop(&mut self) {
        let mut binding = self.shared.lock();
        self.shared.detach(&mut binding);
    }
}
