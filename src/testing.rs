//! Scripted client backend used by the unit tests.
//!
//! Behaviour is driven by the node host names in the config:
//! - `unreachable` fails to build
//! - `close-fails` builds fine but fails to close

use crate::backend::ClientBackend;
use crate::config::ConnectionConfig;
use crate::error::BackendError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

pub(crate) const UNREACHABLE_HOST: &str = "unreachable";
pub(crate) const CLOSE_FAILS_HOST: &str = "close-fails";

pub(crate) fn node(host: &str, port: u16) -> Url {
    Url::parse(&format!("http://{}:{}", host, port)).expect("valid url")
}

pub(crate) fn config_for(host: &str, port: u16) -> ConnectionConfig {
    ConnectionConfig::new(node(host, port))
}

#[derive(Debug)]
pub(crate) struct MockClient {
    pub node: Url,
    pub closed: AtomicBool,
}

#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    builds: AtomicUsize,
    closes: AtomicUsize,
    gate: Option<Semaphore>,
    build_delay: Option<Duration>,
    failing_closes: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes block until `open_gate` hands out permits
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Builds block the calling thread for `delay`
    pub fn slow_build(delay: Duration) -> Self {
        Self {
            build_delay: Some(delay),
            ..Self::default()
        }
    }

    /// The next `count` closes fail, whatever the host
    pub fn fail_next_closes(&self, count: usize) {
        self.failing_closes.store(count, Ordering::SeqCst);
    }

    pub fn open_gate(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ClientBackend for MockBackend {
    type Client = MockClient;

    fn build(&self, config: &ConnectionConfig) -> Result<MockClient, BackendError> {
        let node = config
            .nodes
            .first()
            .cloned()
            .ok_or_else(|| Arc::new(std::io::Error::other("no nodes configured")) as BackendError)?;

        if node.host_str() == Some(UNREACHABLE_HOST) {
            return Err(Arc::new(std::io::Error::other("invalid node url")));
        }

        if let Some(delay) = self.build_delay {
            std::thread::sleep(delay);
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(MockClient {
            node,
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self, client: &MockClient) -> Result<(), BackendError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted_failure = self
            .failing_closes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if scripted_failure || client.node.host_str() == Some(CLOSE_FAILS_HOST) {
            return Err(Arc::new(std::io::Error::other("Close failed")));
        }

        client.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
