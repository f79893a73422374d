//! Page synchronization
//!
//! Turns one page save into graph writes. Page metadata and wiki-links are
//! persisted unconditionally; entity extraction then runs through a tiered
//! cascade: the networked backend when healthy, the scope's reasoning
//! provider next, and the local rule extractor as the floor. A save never
//! fails just because the richer tiers are down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use llm::Provider;

use crate::audit::ContradictionRecord;
use crate::config::SyncConfig;
use crate::contradiction::resolve_contradictions;
use crate::dedup::{find_duplicates, merge_nodes, resolve_canonical, DedupConfig};
use crate::diff::{diff_new_lines, is_new_entity};
use crate::edge::{FactEdge, RelationKind};
use crate::entity::{Entity, EntityKind, PageMeta, RawEntity};
use crate::extract::{
    extract_valid_window, parse_wiki_links, provider_extract, rules_extract, ValidWindow,
};
use crate::remote::{AddEpisodeRequest, BackendClient, HealthGate};
use crate::store::GraphStore;
use crate::vector::{embedding_key, VectorIndex};

/// One page save submitted for synchronization.
#[derive(Debug, Clone)]
pub struct PageSave {
    pub scope: String,
    pub page_id: String,
    pub title: String,
    pub slug: String,
    /// Content before this edit; `None` on first save.
    pub previous: Option<String>,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

/// Which extraction tier handled a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTier {
    /// Networked extraction backend ingested the save as an episode.
    Backend,
    /// The scope's reasoning provider extracted entities.
    Provider,
    /// Local rule-based extraction.
    Rules,
    /// No new lines; only metadata and links were refreshed.
    Skipped,
}

/// What one synchronization did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub tier: SyncTier,
    pub entities: u64,
    pub relations: u64,
    pub contradictions: u64,
    pub duplicates: u64,
    /// Backend episode handle, kept so page deletion can retract it later.
    pub episode_uuid: Option<String>,
}

impl SyncOutcome {
    fn empty(tier: SyncTier) -> Self {
        Self {
            tier,
            entities: 0,
            relations: 0,
            contradictions: 0,
            duplicates: 0,
            episode_uuid: None,
        }
    }
}

struct CommitOutcome {
    entity: Entity,
    relation_written: bool,
    contradictions: u64,
}

struct EmbedData {
    fact_key: String,
    name_key: String,
    fact_vec: Vec<f32>,
    name_vec: Vec<f32>,
}

/// The synchronization engine.
///
/// Cheap to share behind an `Arc`; every handle it holds is already
/// reference-counted or a client with interior pooling.
pub struct SyncEngine {
    store: Arc<dyn GraphStore>,
    backend: Option<BackendClient>,
    health: Arc<HealthGate>,
    providers: HashMap<String, Arc<dyn Provider>>,
    vectors: Arc<RwLock<VectorIndex>>,
    config: SyncConfig,
    dedup: DedupConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        backend: Option<BackendClient>,
        health: Arc<HealthGate>,
        providers: HashMap<String, Arc<dyn Provider>>,
        vectors: Arc<RwLock<VectorIndex>>,
        config: SyncConfig,
        dedup: DedupConfig,
    ) -> Self {
        Self {
            store,
            backend,
            health,
            providers,
            vectors,
            config,
            dedup,
        }
    }

    fn provider_for(&self, scope: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(scope).cloned()
    }

    /// Synchronize one page save into the graph.
    ///
    /// Metadata and link edges are written first and their failure is the
    /// only way this returns an error; extraction-tier failures degrade to
    /// the next tier instead.
    pub async fn sync_page(&self, save: &PageSave) -> Result<SyncOutcome> {
        let diff = diff_new_lines(save.previous.as_deref(), &save.content);

        let page_entity = self.write_page_metadata(save).await?;
        let links = self.write_page_links(save, &page_entity).await?;

        if diff.trim().is_empty() {
            debug!("No new lines in {:?}; extraction skipped", save.title);
            let mut outcome = SyncOutcome::empty(SyncTier::Skipped);
            outcome.relations = links;
            return Ok(outcome);
        }

        if let Some(backend) = &self.backend {
            if self.health.is_available(backend).await {
                match self.backend_sync(backend, save, &diff).await {
                    Ok(mut outcome) => {
                        outcome.relations += links;
                        return Ok(outcome);
                    }
                    Err(err) => {
                        warn!("Backend extraction failed for {:?}: {err:#}", save.title);
                        self.health.mark_unavailable();
                    }
                }
            }
        }

        if let Some(provider) = self.provider_for(&save.scope) {
            let timeout = Duration::from_secs(self.config.provider_timeout_secs);
            let extraction =
                tokio::time::timeout(timeout, provider_extract(provider.as_ref(), &save.title, &diff))
                    .await;
            match extraction {
                Ok(Ok(extracted)) => {
                    let mut outcome = self
                        .commit_entities(
                            SyncTier::Provider,
                            Some(provider.as_ref()),
                            extracted,
                            save,
                            &page_entity,
                        )
                        .await?;
                    outcome.relations += links;
                    return Ok(outcome);
                }
                Ok(Err(err)) => {
                    warn!("Provider extraction failed for {:?}: {err:#}", save.title);
                }
                Err(_) => {
                    warn!(
                        "Provider extraction for {:?} timed out after {}s",
                        save.title, self.config.provider_timeout_secs
                    );
                }
            }
        }

        let extracted = rules_extract(&diff, self.config.max_rule_concepts);
        let mut outcome = self
            .commit_entities(SyncTier::Rules, None, extracted, save, &page_entity)
            .await?;
        outcome.relations += links;
        Ok(outcome)
    }

    /// Retire every fact a removed page asserted.
    ///
    /// Edges are expired, never deleted, so point-in-time reads from before
    /// the removal still see them. Returns the number of edges retired.
    pub async fn remove_page(
        &self,
        scope: &str,
        page_id: &str,
        episode_uuid: Option<&str>,
    ) -> Result<u64> {
        let now = Utc::now();
        let expired = self
            .store
            .expire_page_edges(scope, page_id, now)
            .await
            .context("Failed to retire page edges")?;
        info!("Retired {expired} edges for removed page {page_id}");

        if let (Some(backend), Some(uuid)) = (&self.backend, episode_uuid) {
            if let Err(err) = backend.remove_episode(uuid).await {
                warn!("Failed to remove backend episode {uuid}: {err:#}");
                self.health.mark_unavailable();
            }
        }
        Ok(expired)
    }

    async fn write_page_metadata(&self, save: &PageSave) -> Result<Entity> {
        let meta = PageMeta {
            page_id: save.page_id.clone(),
            slug: save.slug.clone(),
            content_len: save.content.len(),
            updated_at: save.edited_at,
        };
        self.store
            .upsert_page(&save.scope, &save.title, &meta)
            .await
            .context("Failed to persist page metadata")
    }

    /// Reconcile LINKS_TO edges with the `[[...]]` targets in the saved
    /// content: missing links are inserted, links the revision dropped are
    /// expired. Returns the number of links inserted.
    async fn write_page_links(&self, save: &PageSave, page_entity: &Entity) -> Result<u64> {
        let targets = parse_wiki_links(&save.content);
        let mut created = 0u64;
        let mut target_ids = HashSet::new();

        for target in &targets {
            let stub = Entity::new(&save.scope, EntityKind::Document, target.as_str());
            let linked = self
                .store
                .upsert_entity(&stub)
                .await
                .context("Failed to upsert link target")?;
            let current = self
                .store
                .current_edge(&save.scope, &page_entity.id, RelationKind::LinksTo, &linked.id)
                .await
                .context("Failed to look up existing link")?;
            if current.is_none() {
                let fact = format!("{} links to {}", save.title, target);
                let edge = FactEdge::new(
                    &save.scope,
                    &page_entity.id,
                    &linked.id,
                    RelationKind::LinksTo,
                    fact,
                    &save.page_id,
                    save.edited_at,
                );
                self.store
                    .insert_edge(&edge)
                    .await
                    .context("Failed to insert link edge")?;
                created += 1;
            }
            target_ids.insert(linked.id);
        }

        let touching = self
            .store
            .edges_touching(&page_entity.id)
            .await
            .context("Failed to list page links")?;
        for edge in touching {
            let dropped = edge.relation == RelationKind::LinksTo
                && edge.source_id == page_entity.id
                && edge.page_id == save.page_id
                && !target_ids.contains(&edge.target_id);
            if dropped {
                self.store
                    .expire_edge(&edge.id, save.edited_at, save.edited_at)
                    .await
                    .context("Failed to retire dropped link")?;
            }
        }

        Ok(created)
    }

    async fn backend_sync(
        &self,
        backend: &BackendClient,
        save: &PageSave,
        diff: &str,
    ) -> Result<SyncOutcome> {
        let request = AddEpisodeRequest::new(&save.title, diff, &save.scope)
            .with_reference_time(save.edited_at);
        let response = backend.add_episode(&request).await?;
        info!(
            "Backend ingested {:?} as episode {} ({} entities, {} relations)",
            save.title, response.episode_uuid, response.entities_extracted, response.relations_created
        );
        let mut outcome = SyncOutcome::empty(SyncTier::Backend);
        outcome.entities = response.entities_extracted;
        outcome.relations = response.relations_created;
        outcome.episode_uuid = Some(response.episode_uuid);
        Ok(outcome)
    }

    async fn commit_entities(
        &self,
        tier: SyncTier,
        provider: Option<&dyn Provider>,
        extracted: Vec<RawEntity>,
        save: &PageSave,
        page_entity: &Entity,
    ) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::empty(tier);
        let mut committed = Vec::new();

        for raw in extracted {
            match self.commit_entity(&raw, provider, save, page_entity).await {
                Ok(result) => {
                    outcome.entities += 1;
                    outcome.relations += u64::from(result.relation_written);
                    outcome.contradictions += result.contradictions;
                    committed.push(result.entity);
                }
                Err(err) => warn!("Failed to commit entity {:?}: {err:#}", raw.name),
            }
        }

        match self.dedup_batch(&committed, provider, save).await {
            Ok(duplicates) => outcome.duplicates = duplicates,
            Err(err) => warn!("Duplicate detection failed for {:?}: {err:#}", save.title),
        }

        Ok(outcome)
    }

    /// Write one extracted entity and its MENTIONS edge.
    ///
    /// When the page already asserts a different fact about the entity the
    /// old edge generation is expired and an audit trail entry is recorded;
    /// cross-page conflicts go through the provider-judged contradiction
    /// pass instead.
    async fn commit_entity(
        &self,
        raw: &RawEntity,
        provider: Option<&dyn Provider>,
        save: &PageSave,
        page_entity: &Entity,
    ) -> Result<CommitOutcome> {
        let mut stub = Entity::new(&save.scope, raw.kind, raw.name.trim());
        stub.last_seen = save.edited_at;
        let entity = self
            .store
            .upsert_entity(&stub)
            .await
            .context("Failed to upsert entity")?;

        let fact = raw
            .fact
            .clone()
            .unwrap_or_else(|| format!("{} mentions {}", save.title, entity.name));

        let current = self
            .store
            .current_edge(&save.scope, &page_entity.id, RelationKind::Mentions, &entity.id)
            .await
            .context("Failed to look up current mention")?;
        let fact_changed = current.as_ref().is_none_or(|edge| edge.fact != fact);

        // Valid-time extraction runs only for facts that are new to the page
        // or changed by this edit.
        let mut window = ValidWindow::default();
        if let Some(provider) = provider {
            let carried_over = !is_new_entity(&entity.name, save.previous.as_deref());
            if fact_changed || !carried_over {
                match extract_valid_window(provider, &fact, save.edited_at).await {
                    Ok(parsed) => window = parsed,
                    Err(err) => {
                        debug!("Valid-time extraction failed for {:?}: {err:#}", entity.name)
                    }
                }
            }
        }
        let valid_at = window.valid_at.unwrap_or(save.edited_at);

        let mut contradictions = 0u64;
        if let Some(provider) = provider {
            match resolve_contradictions(
                provider,
                self.store.as_ref(),
                &entity,
                &fact,
                &save.page_id,
                window.valid_at,
                save.edited_at,
                self.config.contradiction_confidence,
            )
            .await
            {
                Ok(Some(record)) => contradictions += record.invalidated.len() as u64,
                Ok(None) => {}
                Err(err) => {
                    warn!("Contradiction resolution failed for {:?}: {err:#}", entity.name)
                }
            }
        }

        let mut embed_data = None;
        if fact_changed {
            if let Some(provider) = provider {
                if provider.supports_embedding() {
                    embed_data = self.embed_pair(provider, save, &entity, &fact).await;
                }
            }
        }

        let make_edge = |fact_key: Option<String>| {
            let mut edge = FactEdge::new(
                &save.scope,
                &page_entity.id,
                &entity.id,
                RelationKind::Mentions,
                fact.as_str(),
                &save.page_id,
                save.edited_at,
            )
            .with_valid_at(valid_at);
            if let Some(until) = window.invalid_at {
                edge = edge.with_invalid_at(until);
            }
            if let Some(key) = fact_key {
                edge = edge.with_embedding_key(key);
            }
            edge
        };

        let mut relation_written = false;
        match current {
            Some(existing) if existing.fact == fact => {
                // Same assertion as before; nothing to supersede.
            }
            Some(existing) => {
                // The page revised its own assertion. Mechanical
                // supersession: expire the old generation, insert the new
                // one, record the swap with full confidence.
                let expired = self
                    .store
                    .expire_edge(&existing.id, valid_at, save.edited_at)
                    .await
                    .context("Failed to expire superseded mention")?;
                if expired {
                    let mut record = ContradictionRecord::new(
                        &save.scope,
                        &save.page_id,
                        &fact,
                        "Superseded by a newer revision of the page",
                        save.edited_at,
                    )
                    .with_confidence(1.0);
                    record.push_invalidated(&existing.id, &existing.fact);
                    contradictions += record.invalidated.len() as u64;
                    if let Err(err) = self.store.append_audit(&record).await {
                        warn!("Failed to append supersession audit: {err:#}");
                    }
                }
                let edge = make_edge(embed_data.as_ref().map(|d| d.fact_key.clone()));
                self.store
                    .insert_edge(&edge)
                    .await
                    .context("Failed to insert mention edge")?;
                relation_written = true;
            }
            None => {
                let edge = make_edge(embed_data.as_ref().map(|d| d.fact_key.clone()));
                self.store
                    .insert_edge(&edge)
                    .await
                    .context("Failed to insert mention edge")?;
                relation_written = true;
            }
        }

        if let Some(data) = embed_data {
            let mut index = self.vectors.write().await;
            if let Err(err) = index.insert(
                data.fact_key,
                &save.scope,
                &save.page_id,
                fact.as_str(),
                data.fact_vec,
            ) {
                debug!("Vector insert failed for {:?}: {err}", entity.name);
            }
            if let Err(err) = index.insert(
                data.name_key.clone(),
                &save.scope,
                &save.page_id,
                entity.name.as_str(),
                data.name_vec,
            ) {
                debug!("Vector insert failed for {:?}: {err}", entity.name);
            }
            drop(index);
            if let Err(err) = self.store.set_entity_embedding(&entity.id, &data.name_key).await {
                debug!("Failed to record embedding key for {:?}: {err:#}", entity.name);
            }
        }

        Ok(CommitOutcome {
            entity,
            relation_written,
            contradictions,
        })
    }

    /// Best-effort embedding of a fact/name pair; failures disable the
    /// vectors for this entity, never the commit.
    async fn embed_pair(
        &self,
        provider: &dyn Provider,
        save: &PageSave,
        entity: &Entity,
        fact: &str,
    ) -> Option<EmbedData> {
        match provider.embed(vec![fact.to_string(), entity.name.clone()]).await {
            Ok(mut vectors) if vectors.len() == 2 => {
                let name_vec = vectors.pop().unwrap_or_default();
                let fact_vec = vectors.pop().unwrap_or_default();
                Some(EmbedData {
                    fact_key: embedding_key(&save.scope, fact),
                    name_key: embedding_key(&save.scope, &entity.name),
                    fact_vec,
                    name_vec,
                })
            }
            Ok(vectors) => {
                debug!(
                    "Embedding reply had {} vectors for {:?}, expected 2",
                    vectors.len(),
                    entity.name
                );
                None
            }
            Err(err) => {
                debug!("Embedding failed for {:?}: {err:#}", entity.name);
                None
            }
        }
    }

    /// Run duplicate detection for this batch against the scope and merge
    /// what it finds. Canonical targets are chased through any existing
    /// DUPLICATE_OF chain first so merges never point at a retired node.
    async fn dedup_batch(
        &self,
        committed: &[Entity],
        provider: Option<&dyn Provider>,
        save: &PageSave,
    ) -> Result<u64> {
        if committed.is_empty() {
            return Ok(0);
        }
        let existing = self
            .store
            .entities_in_scope(&save.scope)
            .await
            .context("Failed to list scope entities")?;

        let matches =
            find_duplicates(committed, &existing, provider, &save.content, &self.dedup).await;

        let mut merged = 0u64;
        for mut matched in matches {
            match resolve_canonical(
                self.store.as_ref(),
                &matched.canonical.id,
                self.dedup.max_chain_hops,
            )
            .await
            {
                Ok(resolved) if resolved != matched.canonical.id => {
                    match self.store.fetch_entity_by_id(&resolved).await {
                        Ok(Some(entity)) => matched.canonical = entity,
                        Ok(None) => {
                            warn!("Canonical entity {resolved} vanished; skipping merge");
                            continue;
                        }
                        Err(err) => {
                            warn!("Failed to load canonical entity {resolved}: {err:#}");
                            continue;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("Skipping merge of {:?}: {err:#}", matched.duplicate.name);
                    continue;
                }
            }
            if matched.duplicate.id == matched.canonical.id {
                continue;
            }
            match merge_nodes(self.store.as_ref(), &matched, save.edited_at).await {
                Ok(_) => merged += 1,
                Err(err) => warn!("Failed to merge {:?}: {err:#}", matched.duplicate.name),
            }
        }
        Ok(merged)
    }
}
