use crate::backend::ClientBackend;
use crate::connection::Connection;
use crate::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Event name used for connect events on the process-wide channel
pub const CONNECT_EVENT: &str = "elasticsearch:connection:connect";
/// Event name used for disconnect events on the process-wide channel
pub const DISCONNECT_EVENT: &str = "elasticsearch:connection:disconnect";
/// Event name used for error events on the process-wide channel
pub const ERROR_EVENT: &str = "elasticsearch:connection:error";

/// Manager-level lifecycle event, re-broadcast from connection notifications
pub enum ManagerEvent<B: ClientBackend> {
    /// A connection built its client and is the active one for its name
    Connect { connection: Arc<Connection<B>> },
    /// A connection (active or orphaned) closed its client
    Disconnect { connection: Arc<Connection<B>> },
    /// A connection failed to build or close its client
    Error {
        error: Error,
        connection: Arc<Connection<B>>,
    },
}

impl<B: ClientBackend> ManagerEvent<B> {
    /// Channel name of this event
    pub fn name(&self) -> &'static str {
        match self {
            ManagerEvent::Connect { .. } => CONNECT_EVENT,
            ManagerEvent::Disconnect { .. } => DISCONNECT_EVENT,
            ManagerEvent::Error { .. } => ERROR_EVENT,
        }
    }

    /// The connection the event is about
    pub fn connection(&self) -> &Arc<Connection<B>> {
        match self {
            ManagerEvent::Connect { connection }
            | ManagerEvent::Disconnect { connection }
            | ManagerEvent::Error { connection, .. } => connection,
        }
    }

    /// Name of the connection the event is about
    pub fn connection_name(&self) -> &str {
        self.connection().name()
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            ManagerEvent::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<B: ClientBackend> Clone for ManagerEvent<B> {
    fn clone(&self) -> Self {
        match self {
            ManagerEvent::Connect { connection } => ManagerEvent::Connect {
                connection: connection.clone(),
            },
            ManagerEvent::Disconnect { connection } => ManagerEvent::Disconnect {
                connection: connection.clone(),
            },
            ManagerEvent::Error { error, connection } => ManagerEvent::Error {
                error: error.clone(),
                connection: connection.clone(),
            },
        }
    }
}

impl<B: ClientBackend> fmt::Debug for ManagerEvent<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ManagerEvent");
        out.field("name", &self.name())
            .field("connection", self.connection());
        if let Some(error) = self.error() {
            out.field("error", error);
        }
        out.finish()
    }
}

/// Outbound channel for manager events.
///
/// The transport is up to the host application; [`BroadcastEmitter`] covers
/// the common in-process case.
pub trait EventEmitter<B: ClientBackend>: Send + Sync + 'static {
    fn emit(&self, event: ManagerEvent<B>);
}

/// Emitter backed by a `tokio::sync::broadcast` channel
pub struct BroadcastEmitter<B: ClientBackend> {
    tx: broadcast::Sender<ManagerEvent<B>>,
}

impl<B: ClientBackend> BroadcastEmitter<B> {
    /// Create an emitter whose channel buffers `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to manager events
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent<B>> {
        self.tx.subscribe()
    }
}

impl<B: ClientBackend> EventEmitter<B> for BroadcastEmitter<B> {
    fn emit(&self, event: ManagerEvent<B>) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!("No receivers for {}", name);
        }
    }
}

/// Emitter that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmitter;

impl<B: ClientBackend> EventEmitter<B> for NoopEmitter {
    fn emit(&self, _event: ManagerEvent<B>) {}
}

impl<B: ClientBackend, E: EventEmitter<B>> EventEmitter<B> for Arc<E> {
    fn emit(&self, event: ManagerEvent<B>) {
        (**self).emit(event)
    }
}
