use crate::config::ConnectionConfig;
use crate::error::BackendError;
use std::future::Future;

/// Trait implemented by the search client library being managed.
///
/// The manager only ever needs two things from the client: build a handle
/// from a [`ConnectionConfig`] and close that handle again. Everything else
/// (queries, bulk requests, ...) goes straight through the handle returned by
/// [`Elasticsearch::connection`](crate::Elasticsearch::connection).
///
/// # Example
///
/// ```ignore
/// use es_connection_manager::{BackendError, ClientBackend, ConnectionConfig};
///
/// struct HttpBackend;
///
/// impl ClientBackend for HttpBackend {
///     type Client = my_search::Client;
///
///     fn build(&self, config: &ConnectionConfig) -> Result<Self::Client, BackendError> {
///         my_search::Client::new(&config.nodes).map_err(|e| std::sync::Arc::new(e) as BackendError)
///     }
///
///     async fn close(&self, client: &Self::Client) -> Result<(), BackendError> {
///         client.shutdown().await.map_err(|e| std::sync::Arc::new(e) as BackendError)
///     }
/// }
/// ```
pub trait ClientBackend: Send + Sync + 'static {
    /// Handle returned to callers once a connection is live
    type Client: Send + Sync + 'static;

    /// Builds a client handle.
    ///
    /// Called synchronously from `connect`. A failure here leaves the
    /// connection without a handle.
    fn build(&self, config: &ConnectionConfig) -> Result<Self::Client, BackendError>;

    /// Closes a client handle previously returned by [`build`](Self::build).
    fn close(&self, client: &Self::Client) -> impl Future<Output = Result<(), BackendError>> + Send;
}
