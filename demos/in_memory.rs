//! Example: driving the connection manager with an in-memory client
//!
//! This example implements a `ClientBackend` whose "clients" only remember
//! which node they were built for, then walks a connection through its
//! lifecycle while printing the manager events.
//!
//! Run with: cargo run --example in_memory

use es_connection_manager::{
    BackendError, BroadcastEmitter, ClientBackend, ConnectionConfig, ElasticConfig,
    Elasticsearch, Url,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stand-in for a real search client
struct InMemoryClient {
    node: Url,
}

#[derive(Default)]
struct InMemoryBackend {
    open_clients: AtomicUsize,
}

impl ClientBackend for InMemoryBackend {
    type Client = InMemoryClient;

    fn build(&self, config: &ConnectionConfig) -> Result<InMemoryClient, BackendError> {
        let node = config
            .nodes
            .first()
            .cloned()
            .ok_or_else(|| Arc::new(std::io::Error::other("no nodes")) as BackendError)?;
        self.open_clients.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryClient { node })
    }

    async fn close(&self, client: &InMemoryClient) -> Result<(), BackendError> {
        // Pretend the transport needs a moment to drain
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.open_clients.fetch_sub(1, Ordering::SeqCst);
        info!("Closed client for {}", client.node);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let config = ElasticConfig::builder()
        .connection("main")
        .add_connection("main", ConnectionConfig::new(Url::parse("http://localhost:9200")?))
        .add_connection(
            "logs",
            ConnectionConfig::new(Url::parse("http://logs:9200")?).with_compression(true),
        )
        .build()?;

    let emitter = Arc::new(BroadcastEmitter::<InMemoryBackend>::new(64));
    let mut events = emitter.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                "event {} for {} ({})",
                event.name(),
                event.connection_name(),
                event.connection().id()
            );
        }
    });

    let es = Elasticsearch::new(config, InMemoryBackend::default(), emitter);

    let client = es.client()?;
    info!("Primary client talks to {}", client.node);

    let logs = es.connection("logs")?;
    info!("Logs client talks to {}", logs.node);

    // Point the primary connection somewhere else while it is live
    es.manager()
        .patch("main", ConnectionConfig::new(Url::parse("http://localhost:9300")?));
    let client = es.client()?;
    info!("Primary client now talks to {}", client.node);

    // Give the orphaned client time to finish closing
    tokio::time::sleep(Duration::from_millis(100)).await;

    es.shutdown().await?;

    let snapshot = es.manager().metrics().snapshot();
    info!(
        "connects={} disconnects={} orphan disconnects={} open clients={}",
        snapshot.connections_total,
        snapshot.disconnections_total,
        snapshot.orphan_disconnections_total,
        es.manager().backend().open_clients.load(Ordering::SeqCst)
    );

    Ok(())
}
