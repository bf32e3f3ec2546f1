use std::sync::Arc;
use thiserror::Error;

/// Error raised by the wrapped client library.
///
/// Shared behind an `Arc` so that an [`Error`] can be cloned into every
/// broadcast event and still be returned to the direct caller.
pub type BackendError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Categorizes errors for listener decision-making.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Name is not registered with the manager
    Unmanaged,
    /// Client handle could not be built
    Construction,
    /// Client handle could not be closed
    Disconnect,
    /// Manager and connection disagree about the live handle
    Inconsistency,
    /// Several closes failed at once
    Aggregate,
}

/// Errors that can occur while managing connections
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No slot is registered under this name
    #[error("Unmanaged elasticsearch connection {name}")]
    UnmanagedConnection { name: String },

    /// The client library refused to build a handle
    #[error("Cannot create client for connection {name}: {source}")]
    ConnectionConstruction { name: String, source: BackendError },

    /// Closing the client handle failed
    #[error("Cannot close client for connection {name}: {source}")]
    Disconnect { name: String, source: BackendError },

    /// A connect succeeded but no usable handle is on the slot
    #[error("Cannot get connection for {name}")]
    RuntimeInconsistency { name: String },

    /// One or more closes failed during `close_all`
    #[error("{} connection(s) failed to close: {}", .failures.len(), join_names(.failures))]
    CloseAll { failures: Vec<(String, Error)> },
}

fn join_names(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnmanagedConnection { .. } => ErrorKind::Unmanaged,
            Error::ConnectionConstruction { .. } => ErrorKind::Construction,
            Error::Disconnect { .. } => ErrorKind::Disconnect,
            Error::RuntimeInconsistency { .. } => ErrorKind::Inconsistency,
            Error::CloseAll { .. } => ErrorKind::Aggregate,
        }
    }

    /// Name of the connection the error is about, if it concerns a single one.
    pub fn connection_name(&self) -> Option<&str> {
        match self {
            Error::UnmanagedConnection { name }
            | Error::ConnectionConstruction { name, .. }
            | Error::Disconnect { name, .. }
            | Error::RuntimeInconsistency { name } => Some(name),
            Error::CloseAll { .. } => None,
        }
    }
}
