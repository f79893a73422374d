//! Weft: bi-temporal knowledge graph sync for wiki workspaces
//!
//! Weft keeps a property graph in step with page saves. Every save lands
//! page metadata and wiki-link edges first, then entity extraction runs
//! through a tiered cascade that degrades instead of failing:
//!
//! ```text
//! page save ──> backend episode ──> scope provider ──> local rules
//!               (graph service)     (LLM extraction)   (regex floor)
//! ```
//!
//! Facts are bi-temporal. Transaction time (`created_at`/`expired_at`)
//! records when the graph learned and retired an assertion; valid time
//! (`valid_at`/`invalid_at`) records when it held in the world. Updates
//! expire the old edge and insert a new one, never edit in place, so the
//! graph can be replayed as of any instant via [`Projections::facts_as_of`].

pub mod audit;
pub mod config;
pub mod contradiction;
pub mod dedup;
pub mod diff;
pub mod edge;
pub mod entity;
pub mod extract;
pub mod memory;
pub mod query;
pub mod remote;
pub mod store;
pub mod sync;
pub mod vector;

pub use audit::{ContradictionRecord, InvalidatedFact};
pub use config::{SyncConfig, WeftConfig};
pub use dedup::{DedupConfig, DuplicateMatch};
pub use edge::{FactEdge, MatchTier, RelationKind};
pub use entity::{Entity, EntityKind, PageMeta, RawEntity};
pub use memory::MemoryGraphStore;
pub use query::{Projections, SearchHit, SearchTier};
pub use remote::{BackendClient, BackendConfig, HealthGate};
pub use store::{FalkorStore, GraphStats, GraphStore, RelatedDocument};
pub use sync::{PageSave, SyncEngine, SyncOutcome, SyncTier};
pub use vector::VectorIndex;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::info;

use llm::{LlmClient, Provider};

/// Build a connected [`SyncEngine`] / [`Projections`] pair from a config.
///
/// Both halves share the same store handle, backend health gate, provider
/// map, and vector index, so availability observed on one side carries
/// over to the other.
pub async fn bootstrap(config: &WeftConfig) -> Result<(SyncEngine, Projections)> {
    let store: Arc<dyn GraphStore> = Arc::new(
        FalkorStore::connect(&config.graph)
            .await
            .context("Failed to connect to graph store")?,
    );

    let backend = if config.backend.is_enabled() {
        Some(BackendClient::new(&config.backend).context("Failed to build backend client")?)
    } else {
        None
    };
    let health = Arc::new(HealthGate::new(config.backend.health_ttl()));

    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    for (scope, llm_config) in &config.providers {
        providers.insert(scope.clone(), Arc::new(LlmClient::new(llm_config.clone())));
    }

    let vectors = Arc::new(RwLock::new(VectorIndex::new()));

    info!(
        "weft ready: graph={}, backend={}, providers={}",
        config.graph.graph,
        backend.is_some(),
        providers.len()
    );

    let engine = SyncEngine::new(
        store.clone(),
        backend.clone(),
        health.clone(),
        providers.clone(),
        vectors.clone(),
        config.sync.clone(),
        config.dedup.clone(),
    );
    let views = Projections::new(store, backend, health, providers, vectors);
    Ok((engine, views))
}
