//! Read-side projections
//!
//! Backlinks, related-document ranking, point-in-time fact views, graph
//! stats, and tiered search. Search degrades the same way sync does:
//! backend first, local vectors next, plain substring matching last.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use llm::Provider;

use crate::edge::FactEdge;
use crate::entity::Entity;
use crate::remote::{BackendClient, HealthGate};
use crate::store::{GraphStats, GraphStore, RelatedDocument};
use crate::vector::VectorIndex;

/// Which layer produced a search hit.
///
/// Declaration order is preference order; when the same page surfaces from
/// two tiers, the smaller tier wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTier {
    Backend,
    Vector,
    Substring,
}

/// One search result, resolved to a page.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub page_id: String,
    pub title: String,
    pub score: f32,
    pub tier: SearchTier,
}

/// Read-side views over the knowledge graph.
pub struct Projections {
    store: Arc<dyn GraphStore>,
    backend: Option<BackendClient>,
    health: Arc<HealthGate>,
    providers: HashMap<String, Arc<dyn Provider>>,
    vectors: Arc<RwLock<VectorIndex>>,
}

impl Projections {
    pub fn new(
        store: Arc<dyn GraphStore>,
        backend: Option<BackendClient>,
        health: Arc<HealthGate>,
        providers: HashMap<String, Arc<dyn Provider>>,
        vectors: Arc<RwLock<VectorIndex>>,
    ) -> Self {
        Self {
            store,
            backend,
            health,
            providers,
            vectors,
        }
    }

    /// Documents whose current links point at the given page, by id or by
    /// title for pages that have not been synced yet.
    pub async fn backlinks(&self, scope: &str, page_id: &str, title: &str) -> Result<Vec<Entity>> {
        self.store
            .backlinks(scope, page_id, title)
            .await
            .context("Failed to load backlinks")
    }

    /// Documents ranked by how many entities they mention in common with
    /// the given page.
    pub async fn related(
        &self,
        scope: &str,
        page_id: &str,
        limit: usize,
    ) -> Result<Vec<RelatedDocument>> {
        self.store
            .related_documents(scope, page_id, limit)
            .await
            .context("Failed to load related documents")
    }

    /// Every fact that was visible at the given instant.
    pub async fn facts_as_of(
        &self,
        scope: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<FactEdge>> {
        self.store
            .facts_as_of(scope, as_of)
            .await
            .context("Failed to load point-in-time facts")
    }

    pub async fn stats(&self, scope: &str) -> Result<GraphStats> {
        self.store.stats(scope).await.context("Failed to load graph stats")
    }

    /// Tiered search over the scope.
    ///
    /// Backend hybrid search when the gate is open, cosine search over the
    /// local vector index when the scope's provider can embed the query,
    /// and substring matching over titles and mentions as the floor. Hits
    /// are deduplicated per page before the cap is applied.
    pub async fn search(&self, scope: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();

        if let Some(backend) = &self.backend {
            if self.health.is_available(backend).await {
                match backend.search(query, scope, limit as u32).await {
                    Ok(results) => {
                        for result in results {
                            let page_id = result
                                .metadata
                                .get("page_id")
                                .and_then(|v| v.as_str())
                                .unwrap_or(&result.uuid)
                                .to_string();
                            hits.push(SearchHit {
                                page_id,
                                title: result.name,
                                score: result.score,
                                tier: SearchTier::Backend,
                            });
                        }
                    }
                    Err(err) => {
                        warn!("Backend search failed: {err:#}");
                        self.health.mark_unavailable();
                    }
                }
            }
        }

        if hits.is_empty() {
            if let Some(provider) = self.providers.get(scope) {
                if provider.supports_embedding() {
                    match provider.embed(vec![query.to_string()]).await {
                        Ok(mut vectors) if !vectors.is_empty() => {
                            let needle = vectors.remove(0);
                            let index = self.vectors.read().await;
                            for found in index.search(scope, &needle, limit) {
                                hits.push(SearchHit {
                                    page_id: found.page_id,
                                    title: found.label,
                                    score: found.score,
                                    tier: SearchTier::Vector,
                                });
                            }
                        }
                        Ok(_) => debug!("Query embedding reply was empty"),
                        Err(err) => debug!("Query embedding failed: {err:#}"),
                    }
                }
            }
        }

        if hits.is_empty() {
            let entities = self
                .store
                .search_titles(scope, query)
                .await
                .context("Failed to search titles")?;
            for entity in entities {
                let page_id = entity
                    .page
                    .as_ref()
                    .map(|p| p.page_id.clone())
                    .unwrap_or_else(|| entity.id.clone());
                hits.push(SearchHit {
                    page_id,
                    title: entity.name,
                    score: 0.0,
                    tier: SearchTier::Substring,
                });
            }
        }

        Ok(dedup_hits(hits, limit))
    }
}

/// Collapse hits to one per page, keeping the strongest tier (then the
/// higher score), order the survivors the same way, and cap the list.
fn dedup_hits(hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut best: Vec<SearchHit> = Vec::new();
    for hit in hits {
        match best.iter_mut().find(|kept| kept.page_id == hit.page_id) {
            Some(kept) => {
                let better = hit.tier < kept.tier
                    || (hit.tier == kept.tier && hit.score > kept.score);
                if better {
                    *kept = hit;
                }
            }
            None => best.push(hit),
        }
    }
    best.sort_by(|a, b| {
        a.tier.cmp(&b.tier).then_with(|| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    best.truncate(limit);
    best
}
