//! Subscription Registry
//!
//! Tracks which live connection wants which instruments.
//!
//! # Design
//!
//! The registry tracks:
//! - The subscription set of every live connection (possibly empty)
//! - A reverse index from instrument to subscribed connections
//!
//! Both maps live behind one `RwLock`, so every mutation is exclusive with
//! every bulk read and a reader never sees a half-applied subscribe or
//! unsubscribe. The registry never holds transport resources; a
//! connection is only an opaque [`ConnectionId`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::instrument::{InstrumentCatalog, InstrumentId};

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A connection's subscribed instruments.
pub type SubscriptionSet = HashSet<InstrumentId>;

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Map from connection to its subscribed instruments.
    connection_sets: HashMap<ConnectionId, SubscriptionSet>,
    /// Map from instrument to connections subscribed to it.
    instrument_subscribers: HashMap<InstrumentId, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn add(&mut self, connection: ConnectionId, instruments: impl IntoIterator<Item = InstrumentId>) {
        let Some(set) = self.connection_sets.get_mut(&connection) else {
            return;
        };

        for instrument in instruments {
            // Skip if already subscribed
            if set.contains(&instrument) {
                continue;
            }
            self.instrument_subscribers
                .entry(instrument.clone())
                .or_default()
                .insert(connection);
            set.insert(instrument);
        }
    }

    fn remove<'a>(
        &mut self,
        connection: ConnectionId,
        instruments: impl IntoIterator<Item = &'a InstrumentId>,
    ) {
        let Some(set) = self.connection_sets.get_mut(&connection) else {
            return;
        };

        for instrument in instruments {
            // Skip if never subscribed
            if !set.remove(instrument) {
                continue;
            }
            Self::unindex(&mut self.instrument_subscribers, instrument, connection);
        }
    }

    fn clear(&mut self, connection: ConnectionId) {
        let Some(set) = self.connection_sets.get_mut(&connection) else {
            return;
        };

        for instrument in set.drain() {
            Self::unindex(&mut self.instrument_subscribers, &instrument, connection);
        }
    }

    fn remove_connection(&mut self, connection: ConnectionId) -> bool {
        let Some(set) = self.connection_sets.remove(&connection) else {
            return false;
        };

        for instrument in &set {
            Self::unindex(&mut self.instrument_subscribers, instrument, connection);
        }
        true
    }

    fn unindex(
        index: &mut HashMap<InstrumentId, HashSet<ConnectionId>>,
        instrument: &InstrumentId,
        connection: ConnectionId,
    ) {
        if let Some(subscribers) = index.get_mut(instrument) {
            subscribers.remove(&connection);
            // Last subscriber gone
            if subscribers.is_empty() {
                index.remove(instrument);
            }
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of live connections and their subscriptions.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use fx_rate_stream::domain::instrument::{InstrumentCatalog, InstrumentId};
/// use fx_rate_stream::domain::subscription::SubscriptionRegistry;
///
/// let catalog = Arc::new(InstrumentCatalog::bundled().unwrap());
/// let registry = SubscriptionRegistry::new(catalog);
/// let zar = InstrumentId::parse("ZAR").unwrap();
///
/// let conn = registry.connect();
/// registry.subscribe(conn, Some(&[zar.clone()])).unwrap();
/// assert_eq!(registry.subscribers(&zar), vec![conn]);
///
/// registry.disconnect(conn);
/// assert!(registry.subscribers(&zar).is_empty());
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry {
    catalog: Arc<InstrumentCatalog>,
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry over a catalog.
    #[must_use]
    pub fn new(catalog: Arc<InstrumentCatalog>) -> Self {
        Self {
            catalog,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// The catalog subscriptions are validated against.
    #[must_use]
    pub fn catalog(&self) -> &Arc<InstrumentCatalog> {
        &self.catalog
    }

    /// Register a new connection with an empty subscription set.
    pub fn connect(&self) -> ConnectionId {
        let id = ConnectionId::generate();
        self.state
            .write()
            .connection_sets
            .insert(id, SubscriptionSet::new());
        id
    }

    /// Remove a connection and all of its subscriptions.
    ///
    /// Unknown ids are a no-op; returns whether an entry was removed.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.state.write().remove_connection(id)
    }

    /// Add instruments to a connection's subscription set.
    ///
    /// `None` subscribes to the whole catalog. Otherwise every identifier is
    /// validated first and nothing changes if any is unknown.
    ///
    /// Returns the updated subscription set.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidInstrument` if any identifier is not in the catalog
    /// - `RegistryError::UnknownConnection` if the connection is not registered
    pub fn subscribe(
        &self,
        id: ConnectionId,
        instruments: Option<&[InstrumentId]>,
    ) -> Result<SubscriptionSet, RegistryError> {
        if let Some(instruments) = instruments {
            let unknown = self.catalog.unknown(instruments);
            if !unknown.is_empty() {
                return Err(RegistryError::InvalidInstrument { unknown });
            }
        }

        let mut state = self.state.write();
        if !state.connection_sets.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }

        match instruments {
            Some(instruments) => state.add(id, instruments.iter().cloned()),
            None => state.add(id, self.catalog.identifiers()),
        }

        Ok(state.connection_sets.get(&id).cloned().unwrap_or_default())
    }

    /// Remove instruments from a connection's subscription set.
    ///
    /// `None` clears the set. Identifiers that are not subscribed are ignored.
    ///
    /// Returns the updated subscription set.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownConnection` if the connection is not registered.
    pub fn unsubscribe(
        &self,
        id: ConnectionId,
        instruments: Option<&[InstrumentId]>,
    ) -> Result<SubscriptionSet, RegistryError> {
        let mut state = self.state.write();
        if !state.connection_sets.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }

        match instruments {
            Some(instruments) => state.remove(id, instruments),
            None => state.clear(id),
        }

        Ok(state.connection_sets.get(&id).cloned().unwrap_or_default())
    }

    /// Connections subscribed to an instrument at the time of the call.
    #[must_use]
    pub fn subscribers(&self, instrument: &InstrumentId) -> Vec<ConnectionId> {
        self.state
            .read()
            .instrument_subscribers
            .get(instrument)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current subscription set of a connection (empty if unknown).
    #[must_use]
    pub fn snapshot_subscriptions(&self, id: ConnectionId) -> SubscriptionSet {
        self.state
            .read()
            .connection_sets
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().connection_sets.contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connection_sets.len()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            connections: state.connection_sets.len(),
            instruments: state.instrument_subscribers.len(),
            subscriptions: state.connection_sets.values().map(HashSet::len).sum(),
        }
    }
}

/// Shared registry reference.
pub type SharedRegistry = Arc<SubscriptionRegistry>;

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered connections.
    pub connections: usize,
    /// Distinct instruments with at least one subscriber.
    pub instruments: usize,
    /// Total (connection, instrument) pairs.
    pub subscriptions: usize,
}

// =============================================================================
// Errors
// =============================================================================

/// Registry operation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// One or more identifiers are not in the catalog.
    #[error("Invalid currencies: {{{}}}", join_ids(.unknown))]
    InvalidInstrument {
        /// The unknown identifiers, sorted.
        unknown: Vec<InstrumentId>,
    },

    /// The connection is not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

fn join_ids(ids: &[InstrumentId]) -> String {
    ids.iter()
        .map(InstrumentId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(code: &str) -> InstrumentId {
        InstrumentId::parse(code).unwrap()
    }

    fn ids(codes: &[&str]) -> Vec<InstrumentId> {
        codes.iter().map(|c| id(c)).collect()
    }

    fn set(codes: &[&str]) -> SubscriptionSet {
        codes.iter().map(|c| id(c)).collect()
    }

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::new(InstrumentCatalog::bundled().unwrap()))
    }

    #[test]
    fn connect_starts_empty() {
        let registry = registry();

        let conn = registry.connect();

        assert!(registry.contains(conn));
        assert!(registry.snapshot_subscriptions(conn).is_empty());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn connection_ids_are_unique() {
        let registry = registry();

        let a = registry.connect();
        let b = registry.connect();

        assert_ne!(a, b);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn subscribe_is_additive() {
        let registry = registry();
        let conn = registry.connect();

        registry.subscribe(conn, Some(&ids(&["ZAR"]))).unwrap();
        let updated = registry.subscribe(conn, Some(&ids(&["NGN"]))).unwrap();

        assert_eq!(updated, set(&["ZAR", "NGN"]));
        assert_eq!(registry.snapshot_subscriptions(conn), set(&["ZAR", "NGN"]));
    }

    #[test]
    fn subscribe_all_uses_full_catalog() {
        let registry = registry();
        let conn = registry.connect();

        let updated = registry.subscribe(conn, None).unwrap();

        assert_eq!(updated, registry.catalog().identifiers());
    }

    #[test]
    fn subscribe_empty_list_is_noop() {
        let registry = registry();
        let conn = registry.connect();
        registry.subscribe(conn, Some(&ids(&["KES"]))).unwrap();

        let updated = registry.subscribe(conn, Some(&[])).unwrap();

        assert_eq!(updated, set(&["KES"]));
    }

    #[test]
    fn subscribe_unknown_is_all_or_nothing() {
        let registry = registry();
        let conn = registry.connect();
        registry.subscribe(conn, Some(&ids(&["ZAR"]))).unwrap();

        let err = registry
            .subscribe(conn, Some(&ids(&["NGN", "XXX", "AAA"])))
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::InvalidInstrument {
                unknown: ids(&["AAA", "XXX"])
            }
        );
        assert_eq!(registry.snapshot_subscriptions(conn), set(&["ZAR"]));
        assert!(registry.subscribers(&id("NGN")).is_empty());
    }

    #[test]
    fn invalid_instrument_message() {
        let err = RegistryError::InvalidInstrument {
            unknown: ids(&["XXX"]),
        };
        assert_eq!(err.to_string(), "Invalid currencies: {XXX}");

        let err = RegistryError::InvalidInstrument {
            unknown: ids(&["AAA", "XXX"]),
        };
        assert_eq!(err.to_string(), "Invalid currencies: {AAA, XXX}");
    }

    #[test]
    fn subscribe_unknown_connection() {
        let registry = registry();
        let ghost = ConnectionId::generate();

        let err = registry.subscribe(ghost, None).unwrap_err();

        assert_eq!(err, RegistryError::UnknownConnection(ghost));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn unsubscribe_is_set_difference() {
        let registry = registry();
        let conn = registry.connect();
        registry
            .subscribe(conn, Some(&ids(&["ZAR", "NGN", "KES"])))
            .unwrap();

        let updated = registry
            .unsubscribe(conn, Some(&ids(&["NGN", "GHS", "XXX"])))
            .unwrap();

        assert_eq!(updated, set(&["ZAR", "KES"]));
        assert!(registry.subscribers(&id("NGN")).is_empty());
    }

    #[test]
    fn unsubscribe_all_clears() {
        let registry = registry();
        let conn = registry.connect();
        registry.subscribe(conn, None).unwrap();

        let updated = registry.unsubscribe(conn, None).unwrap();

        assert!(updated.is_empty());
        assert!(registry.contains(conn));
        assert_eq!(registry.stats().instruments, 0);
    }

    #[test]
    fn unsubscribe_unknown_connection() {
        let registry = registry();
        let ghost = ConnectionId::generate();

        assert_eq!(
            registry.unsubscribe(ghost, None).unwrap_err(),
            RegistryError::UnknownConnection(ghost)
        );
    }

    #[test]
    fn subscribers_only_lists_interested_connections() {
        let registry = registry();
        let a = registry.connect();
        let b = registry.connect();
        let c = registry.connect();
        registry.subscribe(a, Some(&ids(&["ZAR", "NGN"]))).unwrap();
        registry.subscribe(b, Some(&ids(&["ZAR"]))).unwrap();
        registry.subscribe(c, Some(&ids(&["KES"]))).unwrap();

        let mut zar = registry.subscribers(&id("ZAR"));
        zar.sort_by_key(ToString::to_string);
        let mut expected = vec![a, b];
        expected.sort_by_key(ToString::to_string);

        assert_eq!(zar, expected);
        assert_eq!(registry.subscribers(&id("NGN")), vec![a]);
        assert!(registry.subscribers(&id("GHS")).is_empty());
    }

    #[test]
    fn disconnect_removes_everything() {
        let registry = registry();
        let conn = registry.connect();
        registry.subscribe(conn, Some(&ids(&["ZAR"]))).unwrap();

        assert!(registry.disconnect(conn));

        assert!(!registry.contains(conn));
        assert!(registry.snapshot_subscriptions(conn).is_empty());
        assert!(registry.subscribers(&id("ZAR")).is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let registry = registry();
        let conn = registry.connect();

        assert!(registry.disconnect(conn));
        assert!(!registry.disconnect(conn));
        assert!(!registry.disconnect(ConnectionId::generate()));
    }

    #[test]
    fn disconnect_preserves_other_connections() {
        let registry = registry();
        let a = registry.connect();
        let b = registry.connect();
        registry.subscribe(a, Some(&ids(&["ZAR"]))).unwrap();
        registry.subscribe(b, Some(&ids(&["ZAR"]))).unwrap();

        registry.disconnect(a);

        assert_eq!(registry.subscribers(&id("ZAR")), vec![b]);
    }

    #[test]
    fn stats_are_accurate() {
        let registry = registry();
        let a = registry.connect();
        let b = registry.connect();
        registry.connect();
        registry.subscribe(a, Some(&ids(&["ZAR", "NGN"]))).unwrap();
        registry.subscribe(b, Some(&ids(&["ZAR"]))).unwrap();

        let stats = registry.stats();

        assert_eq!(stats.connections, 3);
        assert_eq!(stats.instruments, 2); // ZAR and NGN
        assert_eq!(stats.subscriptions, 3);
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::thread;

        let registry = Arc::new(registry());
        let codes = ["ZAR", "NGN", "KES", "GHS", "EGP"];
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            let code = codes[i % codes.len()];
            handles.push(thread::spawn(move || {
                let conn = r.connect();
                r.subscribe(conn, Some(&ids(&[code, "MAD"]))).unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.connections, 10);
        assert_eq!(stats.instruments, 6);
        assert_eq!(registry.subscribers(&id("MAD")).len(), 10);
    }

    #[test]
    fn thread_safety_concurrent_disconnects() {
        use std::thread;

        let registry = Arc::new(registry());
        let conns: Vec<_> = (0..10)
            .map(|_| {
                let conn = registry.connect();
                registry.subscribe(conn, None).unwrap();
                conn
            })
            .collect();

        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let r = Arc::clone(&registry);
                thread::spawn(move || {
                    r.disconnect(conn);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.stats(), RegistryStats::default());
    }
}
