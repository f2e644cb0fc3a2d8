//! The replicated key/value property table.
//!
//! # Concurrency
//!
//! The map sits behind an `RwLock` so readers never wait on each other.
//! Every mutation also takes a writer mutex and holds it until its event
//! has been delivered, so no other mutation can slip in between a state
//! change and its notification. Listeners run after the map lock is
//! released and may read the table, but must not write to it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use netsync_protocol::{IncomingMessage, OutgoingMessage};

use crate::{PropertyError, PropertyType, Value};

/// Most keys a table holds at once. Delta counts are one byte on the
/// wire.
pub const MAX_KEYS: usize = u8::MAX as usize;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyEvent {
    Added(u8),
    Changed(u8),
    Removed(u8),
}

impl PropertyEvent {
    pub fn key(&self) -> u8 {
        match self {
            PropertyEvent::Added(key)
            | PropertyEvent::Changed(key)
            | PropertyEvent::Removed(key) => *key,
        }
    }
}

/// A callback registered with [`PropertyTable::subscribe`].
pub type PropertyListener = Arc<dyn Fn(&PropertyEvent) + Send + Sync>;

/// Handle returned by [`PropertyTable::subscribe`]; pass it back to
/// [`PropertyTable::unsubscribe`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a subscription leaves the listener registered"]
pub struct Subscription(u64);

#[derive(Default)]
struct TableState {
    values: BTreeMap<u8, Value>,
    /// `true` for added or changed, `false` for removed.
    changed: BTreeMap<u8, bool>,
}

/// A map from one-byte keys to tagged values, with change events and
/// delta replication.
pub struct PropertyTable {
    read_only: bool,
    state: RwLock<TableState>,
    writer: Mutex<()>,
    listeners: RwLock<Vec<(u64, PropertyListener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("PropertyTable")
            .field("read_only", &self.read_only)
            .field("values", &state.values)
            .finish_non_exhaustive()
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new(false)
    }
}

impl PropertyTable {
    pub fn new(read_only: bool) -> Self {
        Self {
            read_only,
            state: RwLock::new(TableState::default()),
            writer: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Whether local writes are refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Typed read. An absent key yields `T::default()`.
    pub fn get<T: PropertyType>(&self, key: u8) -> Result<T, PropertyError> {
        Ok(self.try_get(key)?.unwrap_or_default())
    }

    /// Typed read that tells absent keys apart.
    pub fn try_get<T: PropertyType>(&self, key: u8) -> Result<Option<T>, PropertyError> {
        let state = self.read_state();
        let Some(value) = state.values.get(&key) else {
            return Ok(None);
        };
        T::from_value(value)
            .map(Some)
            .ok_or(PropertyError::TypeMismatch {
                key,
                expected: T::KIND,
                found: value.kind(),
            })
    }

    /// The raw tagged value under `key`.
    pub fn get_value(&self, key: u8) -> Option<Value> {
        self.read_state().values.get(&key).cloned()
    }

    pub fn contains(&self, key: u8) -> bool {
        self.read_state().values.contains_key(&key)
    }

    /// Present keys in ascending order.
    pub fn keys(&self) -> Vec<u8> {
        self.read_state().values.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read_state().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().values.is_empty()
    }

    // -----------------------------------------------------------------------
    // Local mutation
    // -----------------------------------------------------------------------

    /// Inserts or overwrites `key`.
    ///
    /// Emits `Added` for a new key and `Changed` for a different value.
    /// Writing a value equal to the stored one emits nothing and leaves
    /// the key out of the next delta.
    ///
    /// # Errors
    /// [`PropertyError::TableFull`] when adding a key to a table that
    /// already holds [`MAX_KEYS`].
    pub fn set<T: PropertyType>(&self, key: u8, value: T) -> Result<(), PropertyError> {
        self.set_with(key, value, T::Options::default())
    }

    /// [`set`](Self::set) with encoding options, such as a timespan's
    /// precision.
    pub fn set_with<T: PropertyType>(
        &self,
        key: u8,
        value: T,
        options: T::Options,
    ) -> Result<(), PropertyError> {
        if self.read_only {
            return Err(PropertyError::ReadOnly);
        }

        // Compare in stored form: lossy options (a low-precision
        // timespan) must not make a repeat look like a change.
        let encoded = value.to_value(options);
        let _writer = self.lock_writer();
        let event = {
            let mut state = self.write_state();
            let event = match state.values.get(&key) {
                Some(existing) if *existing == encoded => None,
                Some(_) => Some(PropertyEvent::Changed(key)),
                None if state.values.len() >= MAX_KEYS => {
                    return Err(PropertyError::TableFull { key });
                }
                None => Some(PropertyEvent::Added(key)),
            };
            if event.is_some() {
                state.values.insert(key, encoded);
                state.changed.insert(key, true);
            }
            event
        };
        if let Some(event) = event {
            self.emit(&event);
        }
        Ok(())
    }

    /// Removes `key`. Emits `Removed` only if it was present.
    pub fn remove(&self, key: u8) -> Result<bool, PropertyError> {
        if self.read_only {
            return Err(PropertyError::ReadOnly);
        }

        let _writer = self.lock_writer();
        let removed = {
            let mut state = self.write_state();
            let removed = state.values.remove(&key).is_some();
            if removed {
                state.changed.insert(key, false);
            }
            removed
        };
        if removed {
            self.emit(&PropertyEvent::Removed(key));
        }
        Ok(removed)
    }

    /// Removes every key, emitting `Removed` for each.
    pub fn clear(&self) -> Result<(), PropertyError> {
        if self.read_only {
            return Err(PropertyError::ReadOnly);
        }

        let _writer = self.lock_writer();
        let removed: Vec<u8> = {
            let mut state = self.write_state();
            let keys: Vec<u8> = state.values.keys().copied().collect();
            state.values.clear();
            for key in &keys {
                state.changed.insert(*key, false);
            }
            keys
        };
        for key in removed {
            self.emit(&PropertyEvent::Removed(key));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Registers `listener` for every event of this table.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PropertyEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription.0);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -----------------------------------------------------------------------
    // Delta sync
    // -----------------------------------------------------------------------

    /// Whether local changes are waiting for [`write_delta`](Self::write_delta).
    pub fn need_sync(&self) -> bool {
        !self.read_state().changed.is_empty()
    }

    /// Marks every present key as changed so the next delta carries the
    /// whole table.
    pub fn force_full_sync(&self) {
        let _writer = self.lock_writer();
        let mut state = self.write_state();
        let keys: Vec<u8> = state.values.keys().copied().collect();
        for key in keys {
            state.changed.insert(key, true);
        }
    }

    /// Writes pending changes and clears them.
    ///
    /// Layout: `[u8 n]([u8 key][byte[] tagged value])*` for added or
    /// changed keys, then `[u8 m]([u8 key])*` for removed ones. Removals
    /// past what one count byte can hold stay pending for the next delta.
    pub fn write_delta(&self, out: &mut OutgoingMessage) {
        let _writer = self.lock_writer();
        let mut state = self.write_state();
        let changed = std::mem::take(&mut state.changed);

        let mut updated: Vec<(u8, Bytes)> = Vec::new();
        let mut removed: Vec<u8> = Vec::new();
        for (key, present) in changed {
            let blob = if present {
                state.values.get(&key).map(Value::to_blob)
            } else {
                None
            };
            match blob {
                Some(blob) if updated.len() < MAX_KEYS => updated.push((key, blob)),
                Some(_) => {
                    state.changed.insert(key, true);
                }
                None if removed.len() < MAX_KEYS => removed.push(key),
                None => {
                    state.changed.insert(key, false);
                }
            }
        }
        if !state.changed.is_empty() {
            tracing::debug!(deferred = state.changed.len(), "delta full, changes deferred");
        }

        out.write(&count_byte(updated.len()));
        for (key, blob) in &updated {
            out.write(key).write(blob);
        }
        out.write(&count_byte(removed.len()));
        for key in &removed {
            out.write(key);
        }
    }

    /// Writes every present key in delta layout without touching the
    /// pending changes.
    ///
    /// Used for snapshots sent to one newcomer while other peers still
    /// expect the regular delta.
    pub fn write_snapshot(&self, out: &mut OutgoingMessage) {
        let state = self.read_state();
        out.write(&count_byte(state.values.len()));
        for (key, value) in state.values.iter().take(MAX_KEYS) {
            out.write(key).write(&value.to_blob());
        }
        out.write(&0u8);
    }

    /// Applies a delta written by a peer's [`write_delta`](Self::write_delta).
    ///
    /// Allowed on read-only tables. Emits the same events as local writes
    /// but does not mark keys for this side's next delta. Nothing is
    /// applied unless the whole delta decodes.
    pub fn apply_delta(&self, input: &mut IncomingMessage) -> Result<(), PropertyError> {
        let delta = PropertyDelta::read(input)?;
        self.apply(delta)
    }

    /// Applies an already decoded delta.
    ///
    /// # Errors
    /// [`PropertyError::TableFull`] if the result would hold more than
    /// [`MAX_KEYS`]; the table is left untouched.
    pub fn apply(&self, delta: PropertyDelta) -> Result<(), PropertyError> {
        let _writer = self.lock_writer();
        {
            let state = self.read_state();
            let mut keys: BTreeSet<u8> = state.values.keys().copied().collect();
            keys.extend(delta.updated.iter().map(|(key, _)| *key));
            for key in &delta.removed {
                keys.remove(key);
            }
            if keys.len() > MAX_KEYS {
                let key = delta.updated.last().map_or(0, |(key, _)| *key);
                return Err(PropertyError::TableFull { key });
            }
        }

        for (key, value) in delta.updated {
            let event = {
                let mut state = self.write_state();
                match state.values.insert(key, value.clone()) {
                    None => Some(PropertyEvent::Added(key)),
                    Some(previous) if previous == value => None,
                    Some(_) => Some(PropertyEvent::Changed(key)),
                }
            };
            if let Some(event) = event {
                self.emit(&event);
            }
        }
        for key in delta.removed {
            let existed = self.write_state().values.remove(&key).is_some();
            if existed {
                self.emit(&PropertyEvent::Removed(key));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn emit(&self, event: &PropertyEvent) {
        let listeners: Vec<PropertyListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A decoded table delta, not yet applied.
///
/// Lets a caller decode every field of a message before touching any
/// state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyDelta {
    updated: Vec<(u8, Value)>,
    removed: Vec<u8>,
}

impl PropertyDelta {
    pub fn read(input: &mut IncomingMessage) -> Result<Self, PropertyError> {
        let updated_count: u8 = input.read()?;
        let mut updated = Vec::with_capacity(usize::from(updated_count));
        for _ in 0..updated_count {
            let key: u8 = input.read()?;
            let blob: Bytes = input.read()?;
            updated.push((key, Value::from_blob(&blob)?));
        }
        let removed_count: u8 = input.read()?;
        let mut removed = Vec::with_capacity(usize::from(removed_count));
        for _ in 0..removed_count {
            removed.push(input.read::<u8>()?);
        }
        Ok(Self { updated, removed })
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

fn count_byte(len: usize) -> u8 {
    u8::try_from(len).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_protocol::{TimePrecision, TimeSpan};

    fn recorder(table: &PropertyTable) -> (Arc<Mutex<Vec<PropertyEvent>>>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = table.subscribe(move |event| sink.lock().unwrap().push(*event));
        (events, sub)
    }

    fn ship(from: &PropertyTable, to: &PropertyTable) {
        let mut out = OutgoingMessage::data();
        from.write_delta(&mut out);
        to.apply_delta(&mut IncomingMessage::from(out)).unwrap();
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[test]
    fn test_repeated_set_emits_single_added() {
        let table = PropertyTable::new(false);
        let (events, _sub) = recorder(&table);

        table.set(1, 5i32).unwrap();
        table.set(1, 5i32).unwrap();

        assert_eq!(*events.lock().unwrap(), vec![PropertyEvent::Added(1)]);
    }

    #[test]
    fn test_set_then_different_value_emits_added_then_changed() {
        let table = PropertyTable::new(false);
        let (events, _sub) = recorder(&table);

        table.set(1, "a".to_string()).unwrap();
        table.set(1, "b".to_string()).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![PropertyEvent::Added(1), PropertyEvent::Changed(1)]
        );
    }

    #[test]
    fn test_repeated_lossy_set_emits_single_added() {
        let table = PropertyTable::new(false);
        let (events, _sub) = recorder(&table);

        table
            .set_with(4, TimeSpan::from_ticks(25_999), TimePrecision::Low)
            .unwrap();
        table.write_delta(&mut OutgoingMessage::data());
        table
            .set_with(4, TimeSpan::from_ticks(25_999), TimePrecision::Low)
            .unwrap();

        assert_eq!(*events.lock().unwrap(), vec![PropertyEvent::Added(4)]);
        assert!(!table.need_sync());
    }

    #[test]
    fn test_full_table_rejects_new_key() {
        let table = PropertyTable::new(false);
        for key in 0..=254u8 {
            table.set(key, i32::from(key)).unwrap();
        }
        let (events, _sub) = recorder(&table);

        assert_eq!(table.set(255, 1i32), Err(PropertyError::TableFull { key: 255 }));
        table.set(0, -1i32).unwrap();

        assert_eq!(table.len(), MAX_KEYS);
        assert!(!table.contains(255));
        assert_eq!(*events.lock().unwrap(), vec![PropertyEvent::Changed(0)]);
    }

    #[test]
    fn test_remove_emits_removed_only_if_present() {
        let table = PropertyTable::new(false);
        let (events, _sub) = recorder(&table);

        assert!(!table.remove(3).unwrap());
        table.set(3, true).unwrap();
        assert!(table.remove(3).unwrap());

        assert_eq!(
            *events.lock().unwrap(),
            vec![PropertyEvent::Added(3), PropertyEvent::Removed(3)]
        );
    }

    #[test]
    fn test_clear_emits_removed_per_key() {
        let table = PropertyTable::new(false);
        table.set(1, 1u8).unwrap();
        table.set(2, 2u8).unwrap();
        let (events, _sub) = recorder(&table);

        table.clear().unwrap();

        assert!(table.is_empty());
        assert_eq!(
            *events.lock().unwrap(),
            vec![PropertyEvent::Removed(1), PropertyEvent::Removed(2)]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let table = PropertyTable::new(false);
        let (events, sub) = recorder(&table);
        assert!(table.unsubscribe(sub));
        assert_eq!(table.listener_count(), 0);

        table.set(1, 1i64).unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_can_read_table() {
        let table = Arc::new(PropertyTable::new(false));
        let seen = Arc::new(Mutex::new(None));
        let (reader, sink) = (Arc::clone(&table), Arc::clone(&seen));
        let _sub = table.subscribe(move |event| {
            *sink.lock().unwrap() = reader.get::<i32>(event.key()).ok();
        });

        table.set(9, 42i32).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(42));
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_absent_key_is_default() {
        let table = PropertyTable::new(false);
        assert_eq!(table.get::<i32>(7).unwrap(), 0);
        assert_eq!(table.get::<String>(7).unwrap(), "");
        assert_eq!(table.try_get::<i32>(7).unwrap(), None);
    }

    #[test]
    fn test_get_wrong_type_is_mismatch() {
        let table = PropertyTable::new(false);
        table.set(1, 3.5f32).unwrap();
        let err = table.get::<i32>(1).unwrap_err();
        assert_eq!(
            err,
            PropertyError::TypeMismatch {
                key: 1,
                expected: crate::ValueKind::Int32,
                found: crate::ValueKind::Float,
            }
        );
    }

    #[test]
    fn test_low_precision_timespan_truncates_locally() {
        let table = PropertyTable::new(false);
        table
            .set_with(4, TimeSpan::from_ticks(25_999), TimePrecision::Low)
            .unwrap();
        assert_eq!(table.get::<TimeSpan>(4).unwrap(), TimeSpan::from_millis(2));
    }

    // -----------------------------------------------------------------------
    // Read-only tables
    // -----------------------------------------------------------------------

    #[test]
    fn test_read_only_rejects_local_writes() {
        let table = PropertyTable::new(true);
        assert_eq!(table.set(1, 1i32), Err(PropertyError::ReadOnly));
        assert_eq!(table.remove(1), Err(PropertyError::ReadOnly));
        assert_eq!(table.clear(), Err(PropertyError::ReadOnly));
    }

    #[test]
    fn test_read_only_accepts_remote_delta() {
        let local = PropertyTable::new(false);
        let mirror = PropertyTable::new(true);
        local.set(2, "mage".to_string()).unwrap();

        ship(&local, &mirror);

        assert_eq!(mirror.get::<String>(2).unwrap(), "mage");
        assert!(!mirror.need_sync());
    }

    // -----------------------------------------------------------------------
    // Delta sync
    // -----------------------------------------------------------------------

    #[test]
    fn test_delta_carries_only_changes() {
        let local = PropertyTable::new(false);
        let remote = PropertyTable::new(true);
        local.set(1, 10i32).unwrap();
        local.set(2, 20i32).unwrap();
        ship(&local, &remote);
        assert!(!local.need_sync());

        local.set(2, 21i32).unwrap();
        local.remove(1).unwrap();
        let (events, _sub) = recorder(&remote);
        ship(&local, &remote);

        assert_eq!(remote.keys(), vec![2]);
        assert_eq!(remote.get::<i32>(2).unwrap(), 21);
        assert_eq!(
            *events.lock().unwrap(),
            vec![PropertyEvent::Changed(2), PropertyEvent::Removed(1)]
        );
    }

    #[test]
    fn test_equal_set_is_not_marked_for_sync() {
        let table = PropertyTable::new(false);
        table.set(1, 1i32).unwrap();
        table.write_delta(&mut OutgoingMessage::data());

        table.set(1, 1i32).unwrap();
        assert!(!table.need_sync());
    }

    #[test]
    fn test_empty_delta_layout() {
        let table = PropertyTable::new(false);
        let mut out = OutgoingMessage::data();
        table.write_delta(&mut out);
        assert_eq!(out.as_bytes(), &[0, 0, 0]);
    }

    #[test]
    fn test_add_then_remove_before_sync_sends_removal() {
        let local = PropertyTable::new(false);
        local.set(5, 1u8).unwrap();
        local.remove(5).unwrap();

        let mut out = OutgoingMessage::data();
        local.write_delta(&mut out);
        assert_eq!(out.as_bytes(), &[0, 0, 1, 5]);
    }

    #[test]
    fn test_force_full_sync_resends_everything() {
        let local = PropertyTable::new(false);
        local.set(1, 1i32).unwrap();
        local.set(2, 2i32).unwrap();
        local.write_delta(&mut OutgoingMessage::data());

        local.force_full_sync();
        let fresh = PropertyTable::new(true);
        ship(&local, &fresh);
        assert_eq!(fresh.keys(), vec![1, 2]);
    }

    #[test]
    fn test_snapshot_keeps_pending_changes() {
        let local = PropertyTable::new(false);
        local.set(1, 1i32).unwrap();
        local.set(2, 2i32).unwrap();
        local.write_delta(&mut OutgoingMessage::data());
        local.set(2, 3i32).unwrap();

        let fresh = PropertyTable::new(true);
        let mut out = OutgoingMessage::data();
        local.write_snapshot(&mut out);
        fresh.apply_delta(&mut IncomingMessage::from(out)).unwrap();

        assert_eq!(fresh.get::<i32>(1).unwrap(), 1);
        assert_eq!(fresh.get::<i32>(2).unwrap(), 3);
        assert!(local.need_sync());
    }

    #[test]
    fn test_repeated_remote_value_emits_nothing() {
        let local = PropertyTable::new(false);
        let remote = PropertyTable::new(true);
        local.set(1, 7i32).unwrap();
        ship(&local, &remote);

        local.force_full_sync();
        let (events, _sub) = recorder(&remote);
        ship(&local, &remote);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_full_table_replicates_every_key() {
        let local = PropertyTable::new(false);
        for key in 0..=254u8 {
            local.set(key, i32::from(key)).unwrap();
        }
        let remote = PropertyTable::new(true);
        ship(&local, &remote);

        assert_eq!(remote.len(), MAX_KEYS);
        assert_eq!(remote.get::<i32>(254).unwrap(), 254);

        let mut snapshot = OutgoingMessage::data();
        local.write_snapshot(&mut snapshot);
        let fresh = PropertyTable::new(true);
        fresh.apply_delta(&mut IncomingMessage::from(snapshot)).unwrap();
        assert_eq!(fresh.keys(), local.keys());
    }

    #[test]
    fn test_removals_past_count_limit_ship_in_next_delta() {
        let local = PropertyTable::new(false);
        for key in 0..=254u8 {
            local.set(key, true).unwrap();
        }
        let remote = PropertyTable::new(true);
        ship(&local, &remote);

        local.clear().unwrap();
        local.set(255, true).unwrap();
        local.remove(255).unwrap();

        let mut first = OutgoingMessage::data();
        local.write_delta(&mut first);
        let mut input = IncomingMessage::from(first);
        assert_eq!(input.read::<u8>().unwrap(), 0);
        assert_eq!(input.read::<u8>().unwrap(), 255);
        assert!(local.need_sync());

        let mut second = OutgoingMessage::data();
        local.write_delta(&mut second);
        assert_eq!(second.as_bytes(), &[0, 0, 1, 255]);
        assert!(!local.need_sync());
    }

    #[test]
    fn test_delta_overflowing_table_is_rejected_whole() {
        let remote = PropertyTable::new(true);
        let filler = PropertyTable::new(false);
        for key in 0..=254u8 {
            filler.set(key, 0u8).unwrap();
        }
        ship(&filler, &remote);

        let extra = PropertyTable::new(false);
        extra.set(0, 9u8).unwrap();
        extra.set(255, 1u8).unwrap();
        let mut out = OutgoingMessage::data();
        extra.write_delta(&mut out);
        let (events, _sub) = recorder(&remote);

        let err = remote.apply_delta(&mut IncomingMessage::from(out)).unwrap_err();
        assert_eq!(err, PropertyError::TableFull { key: 255 });
        assert_eq!(remote.get::<u8>(0).unwrap(), 0);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_delta_applies_nothing() {
        let mut out = OutgoingMessage::data();
        out.write(&2u8)
            .write(&1u8)
            .write(&Value::Bool(true).to_blob())
            .write(&2u8);
        let table = PropertyTable::new(true);
        assert!(table.apply_delta(&mut IncomingMessage::from(out)).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_bad_tag_in_delta_fails() {
        let mut out = OutgoingMessage::data();
        out.write(&1u8).write(&3u8).write(&[250u8][..]).write(&0u8);
        let table = PropertyTable::new(true);
        let err = table.apply_delta(&mut IncomingMessage::from(out)).unwrap_err();
        assert_eq!(err, PropertyError::UnknownTag(250));
        assert!(table.is_empty());
    }
}
