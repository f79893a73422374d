//! Networked extraction backend client
//!
//! The backend is a separate service that runs full LLM entity extraction
//! and episodic storage. It is optional: when unconfigured or unhealthy the
//! sync engine falls back to local extraction tiers. Health probes are
//! memoized so a down backend costs one request per TTL window, not one per
//! page save.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_backend_timeout() -> u64 {
    30
}

fn default_health_ttl() -> u64 {
    60
}

/// Extraction backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend service; empty disables the backend tier.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_backend_timeout")]
    pub request_timeout_secs: u64,
    /// How long one health probe result is trusted, in seconds.
    #[serde(default = "default_health_ttl")]
    pub health_ttl_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: default_backend_timeout(),
            health_ttl_secs: default_health_ttl(),
        }
    }
}

impl BackendConfig {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }
}

/// One page revision submitted for backend extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEpisodeRequest {
    /// Episode name, usually the page title
    pub name: String,
    /// The text to extract from
    pub episode_body: String,
    pub source: String,
    pub source_description: String,
    /// Scope the episode belongs to
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_time: Option<DateTime<Utc>>,
    pub use_custom_entities: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

impl AddEpisodeRequest {
    pub fn new(
        name: impl Into<String>,
        episode_body: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            episode_body: episode_body.into(),
            source: "text".to_string(),
            source_description: "wiki_page".to_string(),
            group_id: group_id.into(),
            reference_time: None,
            use_custom_entities: true,
            custom_instructions: None,
        }
    }

    pub fn with_reference_time(mut self, at: DateTime<Utc>) -> Self {
        self.reference_time = Some(at);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.custom_instructions = Some(instructions.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntityInfo {
    pub entity_name: String,
    pub entity_type: String,
    #[serde(default)]
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEpisodeResponse {
    pub episode_uuid: String,
    pub entities_extracted: u64,
    pub relations_created: u64,
    #[serde(default)]
    pub entity_details: Vec<ExtractedEntityInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub uuid: String,
    pub name: String,
    pub content: String,
    pub source: String,
    pub source_description: String,
    pub created_at: DateTime<Utc>,
    pub valid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GetEpisodesRequest {
    group_id: String,
    limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GetEpisodesResponse {
    episodes: Vec<EpisodeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    limit: u32,
    search_type: String,
}

/// One backend search hit: an entity, edge or episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub uuid: String,
    pub name: String,
    pub content: String,
    pub score: f32,
    pub result_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database_connected: bool,
    pub llm_configured: bool,
    pub embedder_configured: bool,
    pub version: String,
    #[serde(default)]
    pub entity_types_available: Vec<String>,
}

/// HTTP client for the extraction backend.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .context("Backend health request failed")?;
        if !response.status().is_success() {
            return Err(common::Error::Backend(format!(
                "Health check returned {}",
                response.status()
            ))
            .into());
        }
        response
            .json()
            .await
            .context("Failed to decode backend health response")
    }

    /// Submit one page revision for extraction.
    pub async fn add_episode(&self, request: &AddEpisodeRequest) -> Result<AddEpisodeResponse> {
        let response = self
            .http
            .post(self.url("/episodes"))
            .json(request)
            .send()
            .await
            .context("Backend episode request failed")?;
        if !response.status().is_success() {
            return Err(common::Error::Backend(format!(
                "Episode ingest returned {}",
                response.status()
            ))
            .into());
        }
        response
            .json()
            .await
            .context("Failed to decode backend episode response")
    }

    /// Most recent episodes for a scope, newest first.
    pub async fn list_episodes(&self, group_id: &str, limit: u32) -> Result<Vec<EpisodeInfo>> {
        let request = GetEpisodesRequest {
            group_id: group_id.to_string(),
            limit,
        };
        let response = self
            .http
            .post(self.url("/episodes/list"))
            .json(&request)
            .send()
            .await
            .context("Backend episode listing failed")?;
        if !response.status().is_success() {
            return Err(common::Error::Backend(format!(
                "Episode listing returned {}",
                response.status()
            ))
            .into());
        }
        let body: GetEpisodesResponse = response
            .json()
            .await
            .context("Failed to decode backend episode listing")?;
        Ok(body.episodes)
    }

    pub async fn remove_episode(&self, episode_uuid: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/episodes/{episode_uuid}")))
            .send()
            .await
            .context("Backend episode removal failed")?;
        if !response.status().is_success() {
            return Err(common::Error::Backend(format!(
                "Episode removal returned {}",
                response.status()
            ))
            .into());
        }
        Ok(())
    }

    /// Hybrid search across the backend's entities, edges and episodes.
    pub async fn search(
        &self,
        query: &str,
        group_id: &str,
        limit: u32,
    ) -> Result<Vec<SearchResult>> {
        let request = SearchRequest {
            query: query.to_string(),
            group_id: Some(group_id.to_string()),
            limit,
            search_type: "hybrid".to_string(),
        };
        let response = self
            .http
            .post(self.url("/search"))
            .json(&request)
            .send()
            .await
            .context("Backend search failed")?;
        if !response.status().is_success() {
            return Err(common::Error::Backend(format!(
                "Search returned {}",
                response.status()
            ))
            .into());
        }
        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to decode backend search response")?;
        Ok(body.results)
    }
}

/// Memoized backend availability.
///
/// One health probe result is trusted for the TTL; any failed backend call
/// flips the cached state to unavailable so the remaining window is skipped
/// without further probes.
pub struct HealthGate {
    ttl: Duration,
    state: Mutex<Option<(Instant, bool)>>,
}

impl HealthGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Whether the backend should be tried, probing at most once per TTL.
    pub async fn is_available(&self, client: &BackendClient) -> bool {
        if let Some(available) = self.cached() {
            return available;
        }
        let available = match client.health().await {
            Ok(health) => health.status == "healthy",
            Err(err) => {
                debug!("Backend health probe failed: {err:#}");
                false
            }
        };
        self.record(available);
        available
    }

    /// Record a failed backend call without waiting for the next probe.
    pub fn mark_unavailable(&self) {
        self.record(false);
    }

    pub(crate) fn cached(&self) -> Option<bool> {
        let state = *self.state.lock().expect("health gate lock poisoned");
        state.and_then(|(at, available)| (at.elapsed() < self.ttl).then_some(available))
    }

    pub(crate) fn record(&self, available: bool) {
        *self.state.lock().expect("health gate lock poisoned") = Some((Instant::now(), available));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_client() -> BackendClient {
        BackendClient::new(&BackendConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 1,
            health_ttl_secs: 60,
        })
        .unwrap()
    }

    #[test]
    fn test_backend_config_defaults() {
        let config = BackendConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.health_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_backend_config_enabled_with_url() {
        let config: BackendConfig =
            toml::from_str("base_url = \"http://localhost:8000\"").unwrap();
        assert!(config.is_enabled());
        assert_eq!(config.health_ttl_secs, 60);
    }

    #[test]
    fn test_episode_request_serialization() {
        let request = AddEpisodeRequest::new("Home", "Robin has brown hair.", "wiki-ws-1");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["episode_body"], "Robin has brown hair.");
        assert_eq!(json["source"], "text");
        assert_eq!(json["use_custom_entities"], true);
        // Absent options stay off the wire.
        assert!(json.get("reference_time").is_none());
        assert!(json.get("custom_instructions").is_none());
    }

    #[tokio::test]
    async fn test_health_gate_trusts_cached_result() {
        let gate = HealthGate::new(Duration::from_secs(60));
        gate.record(true);
        // The backend is unreachable; a cached hit must not probe it.
        assert!(gate.is_available(&unreachable_client()).await);
    }

    #[tokio::test]
    async fn test_health_gate_probes_when_cache_expired() {
        let gate = HealthGate::new(Duration::from_secs(0));
        gate.record(true);
        assert_eq!(gate.cached(), None);
        // Expired cache forces a probe, which fails against this address.
        assert!(!gate.is_available(&unreachable_client()).await);
    }

    #[test]
    fn test_mark_unavailable_overrides_cached_health() {
        let gate = HealthGate::new(Duration::from_secs(60));
        gate.record(true);
        gate.mark_unavailable();
        assert_eq!(gate.cached(), Some(false));
    }
}
