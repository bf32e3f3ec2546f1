//! # es-connection-manager
//!
//! Lifecycle management for named connections to a search cluster.
//!
//! ## Features
//!
//! - **Named slots** registered up front and connected lazily on first use
//! - **Live reconfiguration** - patching a connection detaches the old client
//!   and tears it down in the background while the name moves on
//! - **Orphan tracking** so a superseded client's late disconnect is still
//!   reported exactly once, without touching its old slot
//! - **Lifecycle events** (connect, disconnect, error) re-broadcast on a
//!   process-wide channel
//! - **Metrics** for observability
//!
//! The client library itself is plugged in through [`ClientBackend`].
//!
//! ## Example
//!
//! ```ignore
//! use es_connection_manager::{BroadcastEmitter, ConnectionConfig, ElasticConfig, Elasticsearch};
//!
//! let config = ElasticConfig::builder()
//!     .connection("main")
//!     .add_connection("main", ConnectionConfig::new("http://localhost:9200".parse()?))
//!     .build()?;
//!
//! let emitter = std::sync::Arc::new(BroadcastEmitter::new(64));
//! let mut events = emitter.subscribe();
//!
//! let es = Elasticsearch::new(config, MyBackend::default(), emitter);
//! let client = es.client()?;
//! ```

mod backend;
mod config;
mod connection;
mod elasticsearch;
mod error;
mod event;
mod manager;
mod metrics;
#[cfg(test)]
mod testing;

pub use backend::ClientBackend;
pub use config::{ConfigError, ConnectionConfig, ElasticConfig, ElasticConfigBuilder};
pub use connection::{
    Connection, ConnectionId, Listener, ListenerId, Notification, NotificationKind,
};
pub use elasticsearch::Elasticsearch;
pub use error::{BackendError, Error, ErrorKind};
pub use event::{
    BroadcastEmitter, EventEmitter, ManagerEvent, NoopEmitter, CONNECT_EVENT, DISCONNECT_EVENT,
    ERROR_EVENT,
};
pub use manager::{ConnectionManager, ConnectionSlot, SlotState};
pub use metrics::{Metrics, MetricsSnapshot};

// Re-export url so callers can build node addresses without a direct dependency
pub use url::Url;

/// Result type for es-connection-manager operations
pub type Result<T> = std::result::Result<T, Error>;
