//! Table owners and how synchronizers find them.
//!
//! A [`PropertiesProvider`] owns the table of one player or one room and
//! can swap it when the underlying session changes. A [`ProviderChain`]
//! lists providers from the synchronizer's own level outward, the way an
//! entity's ancestors would be searched.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::{BindError, PropertyTable};

/// Which kind of table a provider owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderScope {
    Player,
    Room,
}

/// Restricts which providers a synchronizer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderFilter {
    #[default]
    Any,
    Player,
    Room,
}

impl ProviderFilter {
    pub fn accepts(self, scope: ProviderScope) -> bool {
        matches!(
            (self, scope),
            (ProviderFilter::Any, _)
                | (ProviderFilter::Player, ProviderScope::Player)
                | (ProviderFilter::Room, ProviderScope::Room)
        )
    }
}

impl fmt::Display for ProviderFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderFilter::Any => write!(f, "Any"),
            ProviderFilter::Player => write!(f, "Player"),
            ProviderFilter::Room => write!(f, "Room"),
        }
    }
}

/// Where binding happens. Editor tooling has no live tables, so a
/// missing provider there is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindContext {
    #[default]
    Runtime,
    Editor,
}

type RefreshListener = Arc<dyn Fn(Option<Arc<PropertyTable>>) + Send + Sync>;

/// Handle returned by [`PropertiesProvider::subscribe_refresh`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a subscription leaves the listener registered"]
pub struct RefreshSubscription(u64);

/// Owns the current table of one player or room.
pub struct PropertiesProvider {
    scope: ProviderScope,
    table: RwLock<Option<Arc<PropertyTable>>>,
    listeners: RwLock<Vec<(u64, RefreshListener)>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for PropertiesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertiesProvider")
            .field("scope", &self.scope)
            .field("has_table", &self.table().is_some())
            .finish_non_exhaustive()
    }
}

impl PropertiesProvider {
    pub fn new(scope: ProviderScope, table: Option<Arc<PropertyTable>>) -> Self {
        Self {
            scope,
            table: RwLock::new(table),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn player(table: Arc<PropertyTable>) -> Arc<Self> {
        Arc::new(Self::new(ProviderScope::Player, Some(table)))
    }

    pub fn room(table: Arc<PropertyTable>) -> Arc<Self> {
        Arc::new(Self::new(ProviderScope::Room, Some(table)))
    }

    pub fn scope(&self) -> ProviderScope {
        self.scope
    }

    /// The table currently owned, if any.
    pub fn table(&self) -> Option<Arc<PropertyTable>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps the owned table and notifies refresh listeners.
    ///
    /// Setting the same table again is a no-op.
    pub fn replace_table(&self, table: Option<Arc<PropertyTable>>) {
        {
            let mut current = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let unchanged = match (&*current, &table) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }
            *current = table.clone();
        }
        tracing::debug!(scope = ?self.scope, "properties provider refreshed");

        let listeners: Vec<RefreshListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(table.clone());
        }
    }

    /// Registers a callback for table swaps. It receives the new table.
    pub fn subscribe_refresh<F>(&self, listener: F) -> RefreshSubscription
    where
        F: Fn(Option<Arc<PropertyTable>>) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        RefreshSubscription(id)
    }

    pub fn unsubscribe_refresh(&self, subscription: RefreshSubscription) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription.0);
        listeners.len() != before
    }

    pub fn refresh_listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Providers grouped by level, nearest first. Providers on the same
/// level are siblings.
#[derive(Debug, Default, Clone)]
pub struct ProviderChain {
    levels: Vec<Vec<Arc<PropertiesProvider>>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next level outward.
    pub fn with_level(mut self, providers: Vec<Arc<PropertiesProvider>>) -> Self {
        self.levels.push(providers);
        self
    }

    pub fn push_level(&mut self, providers: Vec<Arc<PropertiesProvider>>) {
        self.levels.push(providers);
    }

    /// Finds the nearest provider accepted by `filter`.
    ///
    /// Two or more matches on the first matching level is ambiguous. No
    /// match is an error at runtime and `Ok(None)` in the editor.
    pub fn resolve(
        &self,
        filter: ProviderFilter,
        context: BindContext,
    ) -> Result<Option<Arc<PropertiesProvider>>, BindError> {
        for level in &self.levels {
            let mut matches = level.iter().filter(|p| filter.accepts(p.scope()));
            let Some(first) = matches.next() else {
                continue;
            };
            let extra = matches.count();
            if extra > 0 {
                return Err(BindError::AmbiguousProvider {
                    filter,
                    count: extra + 1,
                });
            }
            return Ok(Some(Arc::clone(first)));
        }

        match context {
            BindContext::Runtime => Err(BindError::ProviderNotFound(filter)),
            BindContext::Editor => Ok(None),
        }
    }
}
