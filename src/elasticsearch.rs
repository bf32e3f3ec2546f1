use crate::backend::ClientBackend;
use crate::config::ElasticConfig;
use crate::error::Error;
use crate::event::EventEmitter;
use crate::manager::{ConnectionManager, ConnectionSlot};
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for applications: owns a [`ConnectionManager`] pre-loaded with
/// every connection from an [`ElasticConfig`] and hands out clients,
/// defaulting to the primary connection.
///
/// Connections are registered eagerly but only connected on first use.
///
/// # Example
///
/// ```ignore
/// let config = ElasticConfig::builder()
///     .connection("main")
///     .add_connection("main", ConnectionConfig::new("http://localhost:9200".parse()?))
///     .build()?;
///
/// let emitter = Arc::new(BroadcastEmitter::new(64));
/// let es = Elasticsearch::new(config, HttpBackend::default(), emitter.clone());
///
/// let client = es.client()?;
/// // ... use the client ...
/// es.shutdown().await?;
/// ```
pub struct Elasticsearch<B: ClientBackend> {
    config: ElasticConfig,
    manager: ConnectionManager<B>,
    primary_connection_name: String,
}

impl<B: ClientBackend> Elasticsearch<B> {
    /// Create the facade and register every configured connection
    pub fn new(config: ElasticConfig, backend: B, emitter: impl EventEmitter<B>) -> Self {
        Self::with_manager(config, ConnectionManager::new(backend, emitter))
    }

    /// Create the facade around an existing manager
    pub fn with_manager(config: ElasticConfig, manager: ConnectionManager<B>) -> Self {
        for (name, connection) in &config.connections {
            manager.add(name, connection.clone());
        }
        debug!(
            "Registered {} connection(s), primary is {}",
            config.connections.len(),
            config.connection
        );

        Self {
            primary_connection_name: config.connection.clone(),
            config,
            manager,
        }
    }

    pub fn manager(&self) -> &ConnectionManager<B> {
        &self.manager
    }

    pub fn config(&self) -> &ElasticConfig {
        &self.config
    }

    pub fn primary_connection_name(&self) -> &str {
        &self.primary_connection_name
    }

    /// Snapshot of the named slot, without connecting
    pub fn get_raw_connection(&self, name: &str) -> Option<ConnectionSlot<B>> {
        self.manager.get(name)
    }

    /// Client for the named connection, connecting it first if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::UnmanagedConnection`] if the name is not registered
    /// - [`Error::ConnectionConstruction`] if the client cannot be built
    /// - [`Error::RuntimeInconsistency`] if the slot has no client after a
    ///   successful connect
    pub fn connection(&self, name: &str) -> Result<Arc<B::Client>, Error> {
        self.manager.connect(name)?;

        let client = self
            .manager
            .get(name)
            .and_then(|slot| slot.connection().and_then(|c| c.client()))
            .ok_or_else(|| Error::RuntimeInconsistency {
                name: name.to_string(),
            })?;

        debug!("[{}] Acquiring connection", name);
        Ok(client)
    }

    /// Client for the primary connection
    pub fn client(&self) -> Result<Arc<B::Client>, Error> {
        self.connection(&self.primary_connection_name)
    }

    /// Close a connection, the primary one when `name` is `None`
    pub async fn close(&self, name: Option<&str>) -> Result<(), Error> {
        let name = name.unwrap_or(self.primary_connection_name.as_str());
        self.manager.close(name, false).await
    }

    /// Close every connection, keeping them registered
    pub async fn close_all(&self) -> Result<(), Error> {
        self.manager.close_all(false).await
    }

    /// Release a connection, the primary one when `name` is `None`
    pub async fn release(&self, name: Option<&str>) -> Result<(), Error> {
        let name = name.unwrap_or(self.primary_connection_name.as_str());
        self.manager.release(name).await
    }

    /// Close every connection before the application exits
    pub async fn shutdown(&self) -> Result<(), Error> {
        info!("Closing all elasticsearch connections");
        self.close_all().await
    }
}
