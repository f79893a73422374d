//! Graph store configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Graph store configuration
///
/// The store speaks the Redis wire protocol; `url` accepts any address the
/// redis client understands (e.g. "redis://127.0.0.1:6379").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Connection URL for the graph store
    #[serde(default = "default_url")]
    pub url: String,

    /// Name of the graph all queries run against
    #[serde(default = "default_graph")]
    pub graph: String,

    /// Per-query timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_graph() -> String {
    "weft".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            graph: default_graph(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GraphConfig {
    /// Create a config for the given URL and graph name
    pub fn new(url: impl Into<String>, graph: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            graph: graph.into(),
            ..Default::default()
        }
    }

    /// Per-query timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.graph, "weft");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
