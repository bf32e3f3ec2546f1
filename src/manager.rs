use crate::backend::ClientBackend;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionId, Notification, NotificationKind};
use crate::error::Error;
use crate::event::{EventEmitter, ManagerEvent};
use crate::metrics::Metrics;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Lifecycle state of a registered slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Added, never connected
    Registered,
    /// Client built and active
    Open,
    /// Close requested, disconnect in flight
    Closing,
    /// Disconnect completed
    Closed,
    /// Config replaced by a patch; waiting for the next connect
    Migrating,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Registered => "registered",
            SlotState::Open => "open",
            SlotState::Closing => "closing",
            SlotState::Closed => "closed",
            SlotState::Migrating => "migrating",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named registry entry: config, optional live connection and state.
///
/// Values handed out by [`ConnectionManager::get`] are snapshots; mutating
/// the registry always goes through the manager.
pub struct ConnectionSlot<B: ClientBackend> {
    name: String,
    config: ConnectionConfig,
    connection: Option<Arc<Connection<B>>>,
    state: SlotState,
}

impl<B: ClientBackend> ConnectionSlot<B> {
    fn new(name: String, config: ConnectionConfig) -> Self {
        Self {
            name,
            config,
            connection: None,
            state: SlotState::Registered,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The live connection instance, if one was created and not torn down
    pub fn connection(&self) -> Option<&Arc<Connection<B>>> {
        self.connection.as_ref()
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Has a connection instance and is in the `open` state
    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.state == SlotState::Open
    }

    /// Whether `connection` is the instance currently held by this slot
    fn holds(&self, connection: &Connection<B>) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|current| current.id() == connection.id())
    }
}

impl<B: ClientBackend> Clone for ConnectionSlot<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            connection: self.connection.clone(),
            state: self.state,
        }
    }
}

impl<B: ClientBackend> fmt::Debug for ConnectionSlot<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("state", &self.state)
            .finish()
    }
}

struct ManagerState<B: ClientBackend> {
    slots: HashMap<String, ConnectionSlot<B>>,
    /// Instances detached by `patch` whose disconnect is still in flight,
    /// keyed by instance identity since a name can be reused right away
    orphans: HashMap<ConnectionId, Arc<Connection<B>>>,
}

impl<B: ClientBackend> Default for ManagerState<B> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            orphans: HashMap::new(),
        }
    }
}

impl<B: ClientBackend> ManagerState<B> {
    /// Insert a new slot unless the name is taken. Returns whether it was added.
    fn insert_slot(&mut self, name: &str, config: ConnectionConfig) -> bool {
        if self.slots.contains_key(name) {
            return false;
        }
        self.slots
            .insert(name.to_string(), ConnectionSlot::new(name.to_string(), config));
        true
    }
}

/// State reachable from connection listeners.
///
/// Listeners only hold a `Weak` to this, so connections never keep a dropped
/// manager alive.
struct Shared<B: ClientBackend> {
    state: RwLock<ManagerState<B>>,
    emitter: Arc<dyn EventEmitter<B>>,
    metrics: Arc<Metrics>,
}

enum DisconnectOutcome {
    Orphan,
    Active,
    Stale,
}

impl<B: ClientBackend> Shared<B> {
    fn handle_connect(&self, connection: &Arc<Connection<B>>) {
        let active = {
            let mut state = self.state.write();
            match state.slots.get_mut(connection.name()) {
                Some(slot) if slot.holds(connection) => {
                    slot.state = SlotState::Open;
                    true
                }
                _ => false,
            }
        };

        if !active {
            trace!(
                "[{}] Ignoring connect from superseded connection {}",
                connection.name(),
                connection.id()
            );
            return;
        }

        trace!("[{}] Connection connected inside manager", connection.name());
        self.metrics.record_connection();
        self.emitter.emit(ManagerEvent::Connect {
            connection: connection.clone(),
        });
    }

    fn handle_disconnect(&self, connection: &Arc<Connection<B>>) {
        let outcome = {
            let mut state = self.state.write();
            if state.orphans.remove(&connection.id()).is_some() {
                DisconnectOutcome::Orphan
            } else {
                match state.slots.get_mut(connection.name()) {
                    Some(slot) if slot.holds(connection) => {
                        slot.connection = None;
                        slot.state = SlotState::Closed;
                        DisconnectOutcome::Active
                    }
                    _ => DisconnectOutcome::Stale,
                }
            }
        };

        match outcome {
            DisconnectOutcome::Orphan => {
                trace!(
                    "[{}] Orphaned connection {} disconnected",
                    connection.name(),
                    connection.id()
                );
                self.metrics.record_orphan_disconnection();
            }
            DisconnectOutcome::Active => {
                trace!("[{}] Disconnecting connection inside manager", connection.name());
                self.metrics.record_disconnection();
            }
            DisconnectOutcome::Stale => {
                trace!(
                    "[{}] Ignoring disconnect from unmanaged connection {}",
                    connection.name(),
                    connection.id()
                );
                return;
            }
        }

        self.emitter.emit(ManagerEvent::Disconnect {
            connection: connection.clone(),
        });
    }

    /// Errors are re-broadcast unconditionally, whatever the registry says.
    fn handle_error(&self, connection: &Arc<Connection<B>>, notification: &Notification<'_>) {
        let Some(error) = notification.error() else {
            return;
        };

        // A failed close still ends the orphan's teardown
        if notification.kind() == NotificationKind::DisconnectError
            && self.state.write().orphans.remove(&connection.id()).is_some()
        {
            debug!(
                "[{}] Orphaned connection {} failed to close",
                connection.name(),
                connection.id()
            );
        }

        self.metrics.record_error();
        self.emitter.emit(ManagerEvent::Error {
            error: error.clone(),
            connection: connection.clone(),
        });
    }
}

/// Registry of named connections to a search cluster.
///
/// Slots are registered with [`add`](Self::add), instantiated lazily by
/// [`connect`](Self::connect), reconfigured by [`patch`](Self::patch) and torn
/// down by [`close`](Self::close) / [`release`](Self::release). Every
/// connection the manager creates is monitored: its connect and disconnect
/// notifications update the slot it belongs to (if it still belongs to one),
/// and every notification is re-broadcast through the [`EventEmitter`].
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync`. Each operation mutates the registry
/// inside a single short critical section guarded by a `parking_lot::RwLock`;
/// that lock is never held across an await point or while listeners run.
/// [`connect`](Self::connect) and [`patch`](Self::patch) are additionally
/// serialized by a separate mutex, so concurrent callers never build two
/// clients for one slot.
pub struct ConnectionManager<B: ClientBackend> {
    backend: Arc<B>,
    shared: Arc<Shared<B>>,
    /// Held across the synchronous client build
    connect_lock: Mutex<()>,
}

impl<B: ClientBackend> ConnectionManager<B> {
    /// Create a new manager
    pub fn new(backend: B, emitter: impl EventEmitter<B>) -> Self {
        Self::with_backend(Arc::new(backend), emitter)
    }

    /// Create a new manager around an already shared backend
    pub fn with_backend(backend: Arc<B>, emitter: impl EventEmitter<B>) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared {
                state: RwLock::new(ManagerState::default()),
                emitter: Arc::new(emitter),
                metrics: Arc::new(Metrics::new()),
            }),
            connect_lock: Mutex::new(()),
        }
    }

    /// Get a reference to the client backend
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Get the metrics for this manager
    pub fn metrics(&self) -> Arc<Metrics> {
        self.shared.metrics.clone()
    }

    /// Register a new connection in the `registered` state.
    ///
    /// Does nothing if the name is already registered; the first config wins.
    /// Use [`patch`](Self::patch) to reconfigure.
    pub fn add(&self, name: &str, config: ConnectionConfig) {
        if self.shared.state.write().insert_slot(name, config) {
            trace!("[{}] Adding new connection to the manager", name);
        }
    }

    /// Instantiate and connect the named connection.
    ///
    /// Does nothing if the slot is already connected. Otherwise a new
    /// [`Connection`] is created from the slot's current config, monitored,
    /// stored on the slot and connected. Building the client is synchronous,
    /// so by the time this returns the connection's `Connect` or `Error`
    /// notification has already been processed. Concurrent calls for the same
    /// name build at most one client; the later caller finds it connected.
    ///
    /// If the slot still holds an instance whose close is in flight, that
    /// instance moves to the orphan set so its disconnect is still broadcast.
    ///
    /// # Errors
    ///
    /// - [`Error::UnmanagedConnection`] if the name is not registered; the
    ///   registry is left untouched.
    /// - [`Error::ConnectionConstruction`] if the client cannot be built; the
    ///   failed instance is detached again and the slot keeps its state.
    pub fn connect(&self, name: &str) -> Result<(), Error> {
        let _guard = self.connect_lock.lock();

        let connection = {
            let mut state = self.shared.state.write();
            let slot = state
                .slots
                .get_mut(name)
                .ok_or_else(|| Error::UnmanagedConnection {
                    name: name.to_string(),
                })?;

            if slot.is_connected() {
                return Ok(());
            }

            let connection = Connection::new(name, slot.config.clone(), self.backend.clone());
            self.monitor_connection(&connection);

            if let Some(previous) = slot.connection.replace(connection.clone()) {
                if previous.ready() {
                    debug!(
                        "[{}] Orphaning connection {} while its close is in flight",
                        name,
                        previous.id()
                    );
                    self.shared.metrics.record_orphaned();
                    state.orphans.insert(previous.id(), previous);
                }
            }
            connection
        };

        if let Err(err) = connection.connect() {
            let mut state = self.shared.state.write();
            if let Some(slot) = state.slots.get_mut(name) {
                if slot.holds(&connection) {
                    slot.connection = None;
                }
            }
            return Err(err);
        }

        Ok(())
    }

    /// Snapshot of the named slot. Never creates anything.
    pub fn get(&self, name: &str) -> Option<ConnectionSlot<B>> {
        self.shared.state.read().slots.get(name).cloned()
    }

    /// Whether the name is registered
    pub fn has(&self, name: &str) -> bool {
        self.shared.state.read().slots.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.state.read().slots.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered slots
    pub fn len(&self) -> usize {
        self.shared.state.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of detached connections whose disconnect has not finished yet
    pub fn orphan_count(&self) -> usize {
        self.shared.state.read().orphans.len()
    }

    /// Replace the config of a connection.
    ///
    /// Behaves like [`add`](Self::add) for unknown names. For a registered
    /// name the slot's connection is detached immediately, the config is
    /// overwritten and the state becomes `migrating`; the next
    /// [`connect`](Self::connect) uses the new config. A detached connection
    /// with a live client is moved to the orphan set and disconnected in the
    /// background; its eventual disconnect is broadcast without touching the
    /// slot.
    ///
    /// The background disconnect runs on the current Tokio runtime. Outside of
    /// one the orphan is kept (see [`orphan_count`](Self::orphan_count)) and
    /// never disconnected.
    pub fn patch(&self, name: &str, config: ConnectionConfig) {
        let _guard = self.connect_lock.lock();

        let orphan = {
            let mut state = self.shared.state.write();
            let Some(slot) = state.slots.get_mut(name) else {
                state.insert_slot(name, config);
                trace!("[{}] Adding new connection to the manager", name);
                return;
            };

            let detached = slot.connection.take();
            slot.config = config;
            slot.state = SlotState::Migrating;

            match detached {
                Some(connection) if connection.ready() => {
                    state.orphans.insert(connection.id(), connection.clone());
                    Some(connection)
                }
                _ => None,
            }
        };

        self.shared.metrics.record_patch();
        debug!("[{}] Connection config patched", name);

        if let Some(connection) = orphan {
            self.shared.metrics.record_orphaned();
            debug!(
                "[{}] Disconnecting orphaned connection {}",
                name,
                connection.id()
            );
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        // Already broadcast as an error event by the monitor
                        if let Err(e) = connection.disconnect().await {
                            debug!("[{}] Orphan disconnect failed: {}", connection.name(), e);
                        }
                    });
                }
                Err(_) => warn!(
                    "[{}] No Tokio runtime to disconnect orphaned connection {}",
                    name,
                    connection.id()
                ),
            }
        }
    }

    /// Whether the name is registered, has a connection and is `open`
    pub fn is_connected(&self, name: &str) -> bool {
        self.shared
            .state
            .read()
            .slots
            .get(name)
            .is_some_and(ConnectionSlot::is_connected)
    }

    /// Close the named connection and wait for the disconnect.
    ///
    /// The slot moves to `closing` as soon as the disconnect is requested and
    /// to `closed` once it completes. A failed disconnect puts the slot back to
    /// `open`, so the close can be retried. With `release` the slot is removed
    /// afterwards, even if the disconnect failed. Unknown or unconnected names
    /// are a no-op (apart from the release).
    ///
    /// # Errors
    ///
    /// [`Error::Disconnect`] if the client fails to close. The same error has
    /// already been broadcast as an error event.
    pub async fn close(&self, name: &str, release: bool) -> Result<(), Error> {
        let connection = {
            let mut state = self.shared.state.write();
            match state.slots.get_mut(name) {
                Some(slot) if slot.is_connected() => {
                    slot.state = SlotState::Closing;
                    slot.connection.clone()
                }
                _ => None,
            }
        };

        let result = match connection {
            Some(connection) => {
                debug!("[{}] Closing connection", name);
                let result = connection.disconnect().await;
                if result.is_err() {
                    self.reopen(name, &connection);
                }
                result
            }
            None => Ok(()),
        };

        if release {
            self.remove_slot(name);
        }

        result
    }

    /// Close every registered connection concurrently.
    ///
    /// A failing close does not stop the others; all failures are collected.
    ///
    /// # Errors
    ///
    /// [`Error::CloseAll`] listing every name whose close failed.
    pub async fn close_all(&self, release: bool) -> Result<(), Error> {
        let names = self.names();
        let results = join_all(names.iter().map(|name| self.close(name, release))).await;

        let failures: Vec<(String, Error)> = names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| result.err().map(|e| (name, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!("{} connection(s) failed to close", failures.len());
            Err(Error::CloseAll { failures })
        }
    }

    /// Remove the named slot, closing it first if it is connected.
    ///
    /// Afterwards the name is no longer registered; re-register it with
    /// [`add`](Self::add).
    ///
    /// # Errors
    ///
    /// [`Error::Disconnect`] if closing fails. The slot is removed anyway.
    pub async fn release(&self, name: &str) -> Result<(), Error> {
        if self.is_connected(name) {
            return self.close(name, true).await;
        }

        self.remove_slot(name);
        Ok(())
    }

    /// Put a slot whose close failed back to `open`
    fn reopen(&self, name: &str, connection: &Connection<B>) {
        let mut state = self.shared.state.write();
        if let Some(slot) = state.slots.get_mut(name) {
            if slot.holds(connection) && slot.state == SlotState::Closing {
                slot.state = SlotState::Open;
            }
        }
    }

    fn remove_slot(&self, name: &str) {
        if self.shared.state.write().slots.remove(name).is_some() {
            self.shared.metrics.record_release();
            trace!("[{}] Released connection from the manager", name);
        }
    }

    /// Subscribe the manager's monitors to a freshly created connection
    fn monitor_connection(&self, connection: &Arc<Connection<B>>) {
        let weak: Weak<Shared<B>> = Arc::downgrade(&self.shared);

        let shared = weak.clone();
        connection.subscribe(NotificationKind::Connect, move |conn, _| {
            if let Some(shared) = shared.upgrade() {
                shared.handle_connect(conn);
            }
        });

        let shared = weak.clone();
        connection.subscribe(NotificationKind::Disconnect, move |conn, _| {
            if let Some(shared) = shared.upgrade() {
                shared.handle_disconnect(conn);
            }
        });

        for kind in [NotificationKind::Error, NotificationKind::DisconnectError] {
            let shared = weak.clone();
            connection.subscribe(kind, move |conn, notification| {
                if let Some(shared) = shared.upgrade() {
                    shared.handle_error(conn, notification);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::event::{BroadcastEmitter, NoopEmitter, CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT};
    use crate::testing::{config_for, MockBackend, CLOSE_FAILS_HOST, UNREACHABLE_HOST};
    use std::sync::atomic::Ordering;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;
    use tokio::time::{timeout, Duration};

    type TestEvents = Receiver<ManagerEvent<MockBackend>>;

    fn new_manager(backend: MockBackend) -> (ConnectionManager<MockBackend>, TestEvents) {
        let emitter = Arc::new(BroadcastEmitter::<MockBackend>::new(64));
        let events = emitter.subscribe();
        (ConnectionManager::new(backend, emitter), events)
    }

    async fn next_event(events: &mut TestEvents) -> ManagerEvent<MockBackend> {
        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[test]
    fn test_add_keeps_first_config() {
        let (manager, _events) = new_manager(MockBackend::new());

        manager.add("main", config_for("localhost", 9200));
        manager.add("main", config_for("localhost", 9201));

        let slot = manager.get("main").expect("slot");
        assert!(manager.has("main"));
        assert_eq!(slot.config(), &config_for("localhost", 9200));
        assert_eq!(slot.state(), SlotState::Registered);
        assert!(slot.connection().is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_connect_unknown_name_fails() {
        let (manager, _events) = new_manager(MockBackend::new());

        let err = manager.connect("missing").expect_err("unmanaged");

        assert!(matches!(err, Error::UnmanagedConnection { ref name } if name == "missing"));
        assert!(!manager.has("missing"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_connect_is_identity_stable() {
        let (manager, mut events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));

        manager.connect("main").expect("connect");
        let first = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");

        assert!(manager.is_connected("main"));
        assert!(first.client().is_some());
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Open));

        manager.connect("main").expect("second connect is a no-op");
        let second = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");

        assert_eq!(first.id(), second.id());
        assert_eq!(manager.backend().builds(), 1);

        let event = events.try_recv().expect("connect event");
        assert_eq!(event.name(), CONNECT_EVENT);
        assert_eq!(event.connection().id(), first.id());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_connect_failure_broadcasts_and_propagates() {
        let (manager, mut events) = new_manager(MockBackend::new());
        manager.add("main", config_for(UNREACHABLE_HOST, 9200));

        let err = manager.connect("main").expect_err("build fails");
        assert_eq!(err.kind(), ErrorKind::Construction);

        let event = events.try_recv().expect("error event");
        assert_eq!(event.name(), ERROR_EVENT);
        assert!(!event.connection().ready());
        assert_eq!(event.error().map(|e| e.to_string()), Some(err.to_string()));

        let slot = manager.get("main").expect("slot");
        assert!(slot.connection().is_none());
        assert_eq!(slot.state(), SlotState::Registered);
        assert!(!manager.is_connected("main"));
        assert_eq!(manager.metrics().errors(), 1);
    }

    #[test]
    fn test_concurrent_connects_build_once() {
        let backend = MockBackend::slow_build(Duration::from_millis(50));
        let manager = ConnectionManager::new(backend, NoopEmitter);
        manager.add("main", config_for("localhost", 9200));

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| manager.connect("main")))
                .collect();
            for handle in handles {
                handle.join().expect("thread").expect("connect");
            }
        });

        assert_eq!(manager.backend().builds(), 1);
        assert!(manager.is_connected("main"));
        assert_eq!(manager.orphan_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_during_close_orphans_closing_instance() {
        let (manager, mut events) = new_manager(MockBackend::gated());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");
        let old = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");
        assert_eq!(next_event(&mut events).await.name(), CONNECT_EVENT);

        let close = manager.close("main", false);
        tokio::pin!(close);
        assert!(timeout(Duration::from_millis(20), &mut close).await.is_err());
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Closing));

        manager.connect("main").expect("reconnect");
        let new = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");
        assert_ne!(old.id(), new.id());
        assert_eq!(manager.orphan_count(), 1);
        assert_eq!(next_event(&mut events).await.connection().id(), new.id());

        manager.backend().open_gate(1);
        close.await.expect("close");

        let event = next_event(&mut events).await;
        assert_eq!(event.name(), DISCONNECT_EVENT);
        assert_eq!(event.connection().id(), old.id());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        let slot = manager.get("main").expect("slot");
        assert_eq!(slot.state(), SlotState::Open);
        assert_eq!(slot.connection().map(|c| c.id()), Some(new.id()));
        assert_eq!(manager.orphan_count(), 0);
    }

    #[tokio::test]
    async fn test_patch_orphans_live_connection() {
        let (manager, mut events) = new_manager(MockBackend::gated());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");
        let _ = next_event(&mut events).await;

        let old = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");

        manager.patch("main", config_for("localhost", 9201));

        let slot = manager.get("main").expect("slot");
        assert!(slot.connection().is_none());
        assert_eq!(slot.state(), SlotState::Migrating);
        assert_eq!(slot.config(), &config_for("localhost", 9201));
        assert_eq!(manager.orphan_count(), 1);

        manager.backend().open_gate(1);

        let event = next_event(&mut events).await;
        assert_eq!(event.name(), DISCONNECT_EVENT);
        assert_eq!(event.connection().id(), old.id());

        assert_eq!(manager.orphan_count(), 0);
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Migrating));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(manager.metrics().orphan_disconnections(), 1);
    }

    #[tokio::test]
    async fn test_patch_then_connect_uses_new_config() {
        let (manager, mut events) = new_manager(MockBackend::gated());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");
        assert!(manager.is_connected("main"));
        let old = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");
        assert_eq!(next_event(&mut events).await.name(), CONNECT_EVENT);

        manager.patch("main", config_for("localhost", 9201));
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Migrating));
        assert!(!manager.is_connected("main"));

        manager.connect("main").expect("reconnect");
        let new = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");

        assert_ne!(old.id(), new.id());
        assert_eq!(new.config().nodes[0].port(), Some(9201));
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Open));
        assert_eq!(next_event(&mut events).await.connection().id(), new.id());

        // The orphan finishing its teardown must not disturb the new instance
        manager.backend().open_gate(1);
        let event = next_event(&mut events).await;
        assert_eq!(event.name(), DISCONNECT_EVENT);
        assert_eq!(event.connection().id(), old.id());

        let slot = manager.get("main").expect("slot");
        assert_eq!(slot.state(), SlotState::Open);
        assert_eq!(slot.connection().map(|c| c.id()), Some(new.id()));
    }

    #[test]
    fn test_patch_unknown_name_adds() {
        let (manager, _events) = new_manager(MockBackend::new());

        manager.patch("main", config_for("localhost", 9200));

        let slot = manager.get("main").expect("slot");
        assert_eq!(slot.state(), SlotState::Registered);
        assert_eq!(manager.metrics().patches(), 0);
    }

    #[test]
    fn test_patch_without_connection_only_migrates() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));

        manager.patch("main", config_for("localhost", 9201));

        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Migrating));
        assert_eq!(manager.orphan_count(), 0);
        assert_eq!(manager.metrics().orphaned(), 0);
    }

    #[test]
    fn test_patch_without_runtime_keeps_orphan() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");

        manager.patch("main", config_for("localhost", 9201));

        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Migrating));
        assert_eq!(manager.orphan_count(), 1);
        assert_eq!(manager.backend().closes(), 0);
    }

    #[tokio::test]
    async fn test_orphan_close_failure_is_broadcast() {
        let (manager, mut events) = new_manager(MockBackend::new());
        manager.add("main", config_for(CLOSE_FAILS_HOST, 9200));
        manager.connect("main").expect("connect");
        let _ = next_event(&mut events).await;

        manager.patch("main", config_for("localhost", 9200));

        let event = next_event(&mut events).await;
        assert_eq!(event.name(), ERROR_EVENT);
        assert_eq!(event.error().map(Error::kind), Some(ErrorKind::Disconnect));
        assert_eq!(manager.orphan_count(), 0);
    }

    #[tokio::test]
    async fn test_close_connection() {
        let (manager, mut events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");
        let _ = next_event(&mut events).await;

        manager.close("main", false).await.expect("close");

        assert!(manager.has("main"));
        assert!(!manager.is_connected("main"));
        let slot = manager.get("main").expect("slot");
        assert_eq!(slot.state(), SlotState::Closed);
        assert!(slot.connection().is_none());
        assert_eq!(next_event(&mut events).await.name(), DISCONNECT_EVENT);
    }

    #[tokio::test]
    async fn test_close_marks_closing_while_in_flight() {
        let (manager, _events) = new_manager(MockBackend::gated());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");

        let close = manager.close("main", false);
        tokio::pin!(close);
        assert!(timeout(Duration::from_millis(20), &mut close).await.is_err());

        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Closing));

        manager.backend().open_gate(1);
        close.await.expect("close");
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Closed));
    }

    #[tokio::test]
    async fn test_failed_close_can_be_retried() {
        let (manager, mut events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");
        let first = manager.get("main").and_then(|s| s.connection().cloned()).expect("live");
        assert_eq!(next_event(&mut events).await.name(), CONNECT_EVENT);

        manager.backend().fail_next_closes(1);
        let err = manager.close("main", false).await.expect_err("first close fails");

        assert_eq!(err.kind(), ErrorKind::Disconnect);
        assert_eq!(next_event(&mut events).await.name(), ERROR_EVENT);
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Open));
        assert!(manager.is_connected("main"));

        manager.close("main", false).await.expect("retry");

        assert_eq!(next_event(&mut events).await.name(), DISCONNECT_EVENT);
        assert_eq!(manager.get("main").map(|s| s.state()), Some(SlotState::Closed));
        let client = first.client().expect("client kept");
        assert!(client.closed.load(Ordering::SeqCst));
        assert_eq!(manager.backend().closes(), 1);
    }

    #[tokio::test]
    async fn test_close_unknown_is_noop() {
        let (manager, _events) = new_manager(MockBackend::new());

        manager.close("missing", false).await.expect("no-op");
        manager.close("missing", true).await.expect("no-op");
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_close_with_release_removes_slot() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");

        manager.close("main", true).await.expect("close");

        assert!(!manager.has("main"));
        assert_eq!(manager.backend().closes(), 1);
    }

    #[tokio::test]
    async fn test_release_always_removes() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("idle", config_for("localhost", 9200));
        manager.add("live", config_for("localhost", 9201));
        manager.add("broken", config_for(CLOSE_FAILS_HOST, 9202));
        manager.connect("live").expect("connect");
        manager.connect("broken").expect("connect");

        manager.release("idle").await.expect("release idle");
        manager.release("live").await.expect("release live");
        let err = manager.release("broken").await.expect_err("close fails");

        assert_eq!(err.kind(), ErrorKind::Disconnect);
        assert!(!manager.has("idle"));
        assert!(!manager.has("live"));
        assert!(!manager.has("broken"));
        assert_eq!(manager.metrics().releases(), 3);
    }

    #[tokio::test]
    async fn test_close_all_isolates_failures() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("a", config_for("localhost", 9200));
        manager.add("b", config_for("localhost", 9201));
        manager.add("c", config_for(CLOSE_FAILS_HOST, 9202));
        manager.add("idle", config_for("localhost", 9203));
        for name in ["a", "b", "c"] {
            manager.connect(name).expect("connect");
        }

        let err = manager.close_all(false).await.expect_err("one close fails");

        match err {
            Error::CloseAll { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "c");
                assert_eq!(failures[0].1.kind(), ErrorKind::Disconnect);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(manager.get("a").map(|s| s.state()), Some(SlotState::Closed));
        assert_eq!(manager.get("b").map(|s| s.state()), Some(SlotState::Closed));
        assert_eq!(manager.get("c").map(|s| s.state()), Some(SlotState::Open));
        assert!(manager.is_connected("c"));
        assert_eq!(manager.get("idle").map(|s| s.state()), Some(SlotState::Registered));
    }

    #[tokio::test]
    async fn test_close_all_with_release_empties_registry() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("a", config_for("localhost", 9200));
        manager.add("b", config_for("localhost", 9201));
        manager.connect("a").expect("connect");

        manager.close_all(true).await.expect("close all");

        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_follow_lifecycle() {
        let (manager, _events) = new_manager(MockBackend::new());
        manager.add("main", config_for("localhost", 9200));
        manager.connect("main").expect("connect");
        manager.close("main", false).await.expect("close");
        manager.connect("main").expect("reconnect");

        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.disconnections_total, 1);
        assert_eq!(snapshot.errors_total, 0);
        assert_eq!(manager.names(), vec!["main".to_string()]);
    }

    #[test]
    fn test_slot_state_display() {
        assert_eq!(SlotState::Registered.to_string(), "registered");
        assert_eq!(SlotState::Migrating.to_string(), "migrating");
    }
}
