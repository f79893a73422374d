//! Engine configuration
//!
//! Loaded from TOML. Every section and field has a default, so an empty
//! file is a valid configuration (local rules-tier extraction against a
//! local graph).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use db::GraphConfig;
use llm::LlmConfig;

use crate::dedup::DedupConfig;
use crate::remote::BackendConfig;

fn default_provider_timeout() -> u64 {
    30
}

fn default_max_rule_concepts() -> usize {
    12
}

fn default_contradiction_confidence() -> f32 {
    0.85
}

/// Extraction pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Hard cap on one provider extraction call, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Most concepts the rule tier may take from one save.
    #[serde(default = "default_max_rule_concepts")]
    pub max_rule_concepts: usize,
    /// Confidence recorded on provider-judged contradiction audits.
    #[serde(default = "default_contradiction_confidence")]
    pub contradiction_confidence: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout(),
            max_rule_concepts: default_max_rule_concepts(),
            contradiction_confidence: default_contradiction_confidence(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Reasoning providers keyed by the scope they serve.
    #[serde(default)]
    pub providers: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl WeftConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = WeftConfig::from_toml("").unwrap();
        assert_eq!(config.graph.graph, "weft");
        assert!(!config.backend.is_enabled());
        assert!(config.providers.is_empty());
        assert_eq!(config.sync.provider_timeout_secs, 30);
        assert_eq!(config.sync.max_rule_concepts, 12);
        assert_eq!(config.dedup.fuzzy_threshold, 0.85);
        assert!(!config.dedup.adjudication);
    }

    #[test]
    fn test_sectioned_config_parses() {
        let text = r#"
[graph]
url = "redis://graph.internal:6379"
graph = "wiki"

[backend]
base_url = "http://localhost:8000"
health_ttl_secs = 120

[providers.ws-1]
model = "gpt-4o"

[sync]
provider_timeout_secs = 10

[dedup]
adjudication = true
"#;
        let config = WeftConfig::from_toml(text).unwrap();
        assert_eq!(config.graph.graph, "wiki");
        assert!(config.backend.is_enabled());
        assert_eq!(config.backend.health_ttl_secs, 120);
        assert_eq!(config.providers["ws-1"].model, "gpt-4o");
        assert_eq!(config.sync.provider_timeout_secs, 10);
        // Unset fields keep their defaults.
        assert_eq!(config.sync.max_rule_concepts, 12);
        assert!(config.dedup.adjudication);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(WeftConfig::from_toml("graph = [broken").is_err());
    }
}
