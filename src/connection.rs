use crate::backend::ClientBackend;
use crate::config::ConnectionConfig;
use crate::error::Error;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Process-wide counter so that two instances never share an id, even when
/// they share a name.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one [`Connection`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kinds of lifecycle notifications a connection emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Client handle was built
    Connect,
    /// Client handle was closed
    Disconnect,
    /// Closing the client handle failed
    DisconnectError,
    /// Building the client handle failed
    Error,
}

/// A lifecycle notification, as delivered to listeners.
#[derive(Debug, Clone, Copy)]
pub enum Notification<'a> {
    Connect,
    Disconnect,
    DisconnectError(&'a Error),
    Error(&'a Error),
}

impl<'a> Notification<'a> {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Connect => NotificationKind::Connect,
            Notification::Disconnect => NotificationKind::Disconnect,
            Notification::DisconnectError(_) => NotificationKind::DisconnectError,
            Notification::Error(_) => NotificationKind::Error,
        }
    }

    /// The error carried by `Error` and `DisconnectError` notifications
    pub fn error(&self) -> Option<&'a Error> {
        match *self {
            Notification::DisconnectError(err) | Notification::Error(err) => Some(err),
            Notification::Connect | Notification::Disconnect => None,
        }
    }
}

/// Callback registered through [`Connection::subscribe`]
pub type Listener<B> = Arc<dyn Fn(&Arc<Connection<B>>, &Notification<'_>) + Send + Sync>;

/// Handle returned by [`Connection::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One instantiated client session for a named endpoint.
///
/// A connection knows nothing about the manager that created it. The only way
/// outside code learns about its transitions is through the listeners
/// registered with [`subscribe`](Self::subscribe).
pub struct Connection<B: ClientBackend> {
    id: ConnectionId,
    name: String,
    config: ConnectionConfig,
    backend: Arc<B>,
    /// Set once by a successful `connect`, never replaced afterwards
    client: RwLock<Option<Arc<B::Client>>>,
    listeners: RwLock<Vec<(ListenerId, NotificationKind, Listener<B>)>>,
    next_listener_id: AtomicU64,
}

impl<B: ClientBackend> Connection<B> {
    /// Create a new, not yet connected instance
    pub fn new(name: impl Into<String>, config: ConnectionConfig, backend: Arc<B>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            name: name.into(),
            config,
            backend,
            client: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Config snapshot this instance was created with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether a client handle has been built
    pub fn ready(&self) -> bool {
        self.client.read().is_some()
    }

    /// The client handle, once `connect` succeeded
    pub fn client(&self) -> Option<Arc<B::Client>> {
        self.client.read().clone()
    }

    /// Register a listener for one kind of notification.
    pub fn subscribe<F>(&self, kind: NotificationKind, listener: F) -> ListenerId
    where
        F: Fn(&Arc<Connection<B>>, &Notification<'_>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener<B> = Arc::new(listener);
        self.listeners.write().push((id, kind, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    fn emit(self: &Arc<Self>, notification: Notification<'_>) {
        // Snapshot first so listeners may (un)subscribe while being called
        let listeners: Vec<Listener<B>> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, kind, _)| *kind == notification.kind())
            .map(|(_, _, listener)| listener.clone())
            .collect();

        for listener in listeners {
            (*listener)(self, &notification);
        }
    }

    /// Build the client handle.
    ///
    /// Emits `Connect` on success. On failure emits `Error` and then returns
    /// the same error; the handle stays unset.
    pub fn connect(self: &Arc<Self>) -> Result<(), Error> {
        if self.ready() {
            debug!("[{}] Connection {} already has a client", self.name, self.id);
            return Ok(());
        }

        match self.backend.build(&self.config) {
            Ok(client) => {
                *self.client.write() = Some(Arc::new(client));
                self.emit(Notification::Connect);
                info!("[{}] Connected to cluster", self.name);
                Ok(())
            }
            Err(source) => {
                let err = Error::ConnectionConstruction {
                    name: self.name.clone(),
                    source,
                };
                warn!("[{}] Failed to create client: {}", self.name, err);
                self.emit(Notification::Error(&err));
                Err(err)
            }
        }
    }

    /// Close the client handle. Does nothing if there is none.
    ///
    /// Emits `Disconnect` on success. On failure emits `DisconnectError` and
    /// then returns the same error to the caller.
    pub async fn disconnect(self: &Arc<Self>) -> Result<(), Error> {
        let Some(client) = self.client() else {
            return Ok(());
        };

        match self.backend.close(&client).await {
            Ok(()) => {
                self.emit(Notification::Disconnect);
                info!("[{}] Disconnected from cluster", self.name);
                Ok(())
            }
            Err(source) => {
                let err = Error::Disconnect {
                    name: self.name.clone(),
                    source,
                };
                warn!("[{}] Failed to close client: {}", self.name, err);
                self.emit(Notification::DisconnectError(&err));
                Err(err)
            }
        }
    }
}

impl<B: ClientBackend> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.ready())
            .finish()
    }
}
