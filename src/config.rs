use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use url::Url;

/// Top-level configuration: the primary connection name plus every named
/// connection the facade should register.
///
/// Mirrors the shape host applications keep in their config files:
///
/// ```json
/// {
///   "connection": "main",
///   "connections": {
///     "main": { "nodes": ["http://localhost:9200"] }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Name of the primary connection used when no name is given
    pub connection: String,
    /// All named connections
    pub connections: HashMap<String, ConnectionConfig>,
}

impl ElasticConfig {
    /// Create a new builder for configuration
    pub fn builder() -> ElasticConfigBuilder {
        ElasticConfigBuilder::default()
    }

    /// Run the builder's validation against an already constructed value
    /// (e.g. one that came out of a deserializer).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.is_empty() {
            return Err(ConfigError::MissingPrimary(
                "primary connection name cannot be empty".to_string(),
            ));
        }

        if !self.connections.contains_key(&self.connection) {
            return Err(ConfigError::MissingPrimary(format!(
                "primary connection {} is not defined in connections",
                self.connection
            )));
        }

        for (name, config) in &self.connections {
            if config.nodes.is_empty() {
                return Err(ConfigError::InvalidConnection {
                    name: name.clone(),
                    reason: "at least one node is required".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Builder for ElasticConfig
#[derive(Debug, Clone, Default)]
pub struct ElasticConfigBuilder {
    connection: Option<String>,
    connections: HashMap<String, ConnectionConfig>,
}

impl ElasticConfigBuilder {
    /// Set the primary connection name
    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    /// Add a named connection. A later call with the same name replaces the
    /// earlier one.
    pub fn add_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Build the configuration with validation.
    ///
    /// When no primary name was set and exactly one connection exists, that
    /// connection becomes the primary.
    pub fn build(self) -> Result<ElasticConfig, ConfigError> {
        let connection = match self.connection {
            Some(name) => name,
            None if self.connections.len() == 1 => {
                self.connections.keys().next().cloned().unwrap_or_default()
            }
            None => {
                return Err(ConfigError::MissingPrimary(
                    "primary connection name must be set".to_string(),
                ))
            }
        };

        let config = ElasticConfig {
            connection,
            connections: self.connections,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Primary connection is missing or unknown
    #[error("Invalid primary connection: {0}")]
    MissingPrimary(String),
    /// A named connection is unusable
    #[error("Invalid connection {name}: {reason}")]
    InvalidConnection { name: String, reason: String },
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

/// Settings handed to the client library when a connection is instantiated.
///
/// The manager never interprets these; it stores them on the slot and
/// replaces them wholesale on patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Cluster nodes to talk to
    pub nodes: Vec<Url>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries the client performs on its own
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether request bodies are compressed
    #[serde(default)]
    pub compression: bool,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Config for a single node with default transport options
    pub fn new(node: Url) -> Self {
        Self {
            nodes: vec![node],
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            compression: false,
            headers: BTreeMap::new(),
        }
    }

    /// Add another node
    pub fn with_node(mut self, node: Url) -> Self {
        self.nodes.push(node);
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry count
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Enable or disable compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
