//! In-memory graph store
//!
//! Implements [`GraphStore`] over hash maps behind a mutex. Intended for
//! tests and as a reference implementation of the store contract; every
//! method mirrors the graph-backed store's semantics, including conditional
//! expiry and the duplicate-edge carve-outs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::ContradictionRecord;
use crate::edge::{FactEdge, MatchTier, RelationKind};
use crate::entity::{Entity, EntityKind, PageMeta};
use crate::store::{GraphStats, GraphStore, RelatedDocument};

#[derive(Default)]
struct Inner {
    entities: HashMap<String, Entity>,
    edges: HashMap<String, FactEdge>,
    audits: Vec<ContradictionRecord>,
}

/// In-memory [`GraphStore`].
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: Mutex<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Audit records appended so far, in append order.
    pub fn audits(&self) -> Vec<ContradictionRecord> {
        self.lock().audits.clone()
    }

    /// Every stored edge, including expired generations.
    pub fn all_edges(&self) -> Vec<FactEdge> {
        self.lock().edges.values().cloned().collect()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        let mut inner = self.lock();
        if let Some(existing) = inner.entities.values_mut().find(|e| {
            e.scope == entity.scope && e.kind == entity.kind && e.name == entity.name
        }) {
            existing.last_seen = entity.last_seen;
            return Ok(existing.clone());
        }
        inner.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity.clone())
    }

    async fn fetch_entity(
        &self,
        scope: &str,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<Entity>> {
        Ok(self
            .lock()
            .entities
            .values()
            .find(|e| e.scope == scope && e.kind == kind && e.name == name)
            .cloned())
    }

    async fn fetch_entity_by_id(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.lock().entities.get(id).cloned())
    }

    async fn entities_in_scope(&self, scope: &str) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self
            .lock()
            .entities
            .values()
            .filter(|e| e.scope == scope)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entities)
    }

    async fn set_entity_embedding(&self, id: &str, key: &str) -> Result<()> {
        let mut inner = self.lock();
        let entity = inner
            .entities
            .get_mut(id)
            .with_context(|| format!("No entity with id {id}"))?;
        entity.embedding_key = Some(key.to_string());
        Ok(())
    }

    async fn upsert_page(&self, scope: &str, title: &str, meta: &PageMeta) -> Result<Entity> {
        let mut inner = self.lock();
        if let Some(existing) = inner.entities.values_mut().find(|e| {
            e.scope == scope && e.kind == EntityKind::Document && e.name == title
        }) {
            existing.last_seen = meta.updated_at;
            existing.page = Some(meta.clone());
            return Ok(existing.clone());
        }
        let entity = Entity {
            id: Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            kind: EntityKind::Document,
            name: title.to_string(),
            last_seen: meta.updated_at,
            embedding_key: None,
            page: Some(meta.clone()),
        };
        inner.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn insert_edge(&self, edge: &FactEdge) -> Result<()> {
        let mut inner = self.lock();
        if !inner.entities.contains_key(&edge.source_id)
            || !inner.entities.contains_key(&edge.target_id)
        {
            bail!(
                "Edge endpoints not found: {} -> {}",
                edge.source_id,
                edge.target_id
            );
        }
        inner.edges.insert(edge.id.clone(), edge.clone());
        Ok(())
    }

    async fn current_edge(
        &self,
        scope: &str,
        source_id: &str,
        relation: RelationKind,
        target_id: &str,
    ) -> Result<Option<FactEdge>> {
        Ok(self
            .lock()
            .edges
            .values()
            .find(|e| {
                e.scope == scope
                    && e.source_id == source_id
                    && e.target_id == target_id
                    && e.relation == relation
                    && e.expired_at.is_none()
            })
            .cloned())
    }

    async fn expire_edge(
        &self,
        edge_id: &str,
        invalid_at: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        match inner.edges.get_mut(edge_id) {
            Some(edge) if edge.expired_at.is_none() => {
                edge.expired_at = Some(expired_at);
                edge.invalid_at = Some(invalid_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn visible_facts_about(
        &self,
        scope: &str,
        entity_id: &str,
        exclude_page_id: &str,
    ) -> Result<Vec<FactEdge>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .edges
            .values()
            .filter(|e| {
                e.scope == scope
                    && e.relation == RelationKind::Mentions
                    && e.target_id == entity_id
                    && e.page_id != exclude_page_id
                    && e.is_visible_at(now)
            })
            .cloned()
            .collect())
    }

    async fn expire_page_edges(
        &self,
        scope: &str,
        page_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.lock();
        let mut expired = 0u64;
        for edge in inner.edges.values_mut() {
            if edge.scope == scope
                && edge.page_id == page_id
                && edge.expired_at.is_none()
                && edge.relation != RelationKind::DuplicateOf
            {
                edge.expired_at = Some(now);
                edge.invalid_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn edges_touching(&self, entity_id: &str) -> Result<Vec<FactEdge>> {
        Ok(self
            .lock()
            .edges
            .values()
            .filter(|e| {
                e.expired_at.is_none()
                    && e.relation != RelationKind::DuplicateOf
                    && (e.source_id == entity_id || e.target_id == entity_id)
            })
            .cloned()
            .collect())
    }

    async fn repoint_edge(
        &self,
        edge: &FactEdge,
        new_source: &str,
        new_target: &str,
    ) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.entities.contains_key(new_source) || !inner.entities.contains_key(new_target) {
            return Ok(false);
        }
        match inner.edges.get_mut(&edge.id) {
            Some(stored)
                if stored.expired_at.is_none()
                    && stored.source_id == edge.source_id
                    && stored.target_id == edge.target_id =>
            {
                stored.source_id = new_source.to_string();
                stored.target_id = new_target.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_duplicate_edge(
        &self,
        scope: &str,
        duplicate_id: &str,
        canonical_id: &str,
        fact: &str,
        confidence: f32,
        tier: MatchTier,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if !inner.entities.contains_key(duplicate_id)
            || !inner.entities.contains_key(canonical_id)
        {
            bail!("Duplicate edge endpoints not found: {duplicate_id} -> {canonical_id}");
        }
        if let Some(existing) = inner.edges.values_mut().find(|e| {
            e.relation == RelationKind::DuplicateOf
                && e.source_id == duplicate_id
                && e.target_id == canonical_id
        }) {
            existing.confidence = Some(confidence);
            existing.tier = Some(tier);
            return Ok(());
        }
        let edge = FactEdge::new(
            scope,
            duplicate_id,
            canonical_id,
            RelationKind::DuplicateOf,
            fact,
            "",
            now,
        )
        .with_match(confidence, tier);
        inner.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    async fn duplicate_target(&self, entity_id: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .edges
            .values()
            .find(|e| {
                e.relation == RelationKind::DuplicateOf
                    && e.source_id == entity_id
                    && e.expired_at.is_none()
            })
            .map(|e| e.target_id.clone()))
    }

    async fn append_audit(&self, record: &ContradictionRecord) -> Result<()> {
        self.lock().audits.push(record.clone());
        Ok(())
    }

    async fn backlinks(&self, scope: &str, page_id: &str, title: &str) -> Result<Vec<Entity>> {
        let inner = self.lock();
        let mut docs: Vec<Entity> = inner
            .edges
            .values()
            .filter(|e| {
                e.scope == scope
                    && e.relation == RelationKind::LinksTo
                    && e.expired_at.is_none()
            })
            .filter(|e| match inner.entities.get(&e.target_id) {
                Some(target) => match &target.page {
                    Some(page) => page.page_id == page_id,
                    None => target.name.eq_ignore_ascii_case(title),
                },
                None => false,
            })
            .filter_map(|e| inner.entities.get(&e.source_id).cloned())
            .collect();
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        docs.dedup_by(|a, b| a.id == b.id);
        Ok(docs)
    }

    async fn related_documents(
        &self,
        scope: &str,
        page_id: &str,
        limit: usize,
    ) -> Result<Vec<RelatedDocument>> {
        let inner = self.lock();
        let Some(source_doc) = inner.entities.values().find(|e| {
            e.scope == scope && e.page.as_ref().is_some_and(|p| p.page_id == page_id)
        }) else {
            return Ok(Vec::new());
        };
        let mentioned: HashSet<&str> = inner
            .edges
            .values()
            .filter(|e| {
                e.relation == RelationKind::Mentions
                    && e.expired_at.is_none()
                    && e.source_id == source_doc.id
            })
            .map(|e| e.target_id.as_str())
            .collect();
        let mut shared_by_doc: HashMap<String, HashSet<String>> = HashMap::new();
        for edge in inner.edges.values() {
            if edge.relation != RelationKind::Mentions || edge.expired_at.is_some() {
                continue;
            }
            if !mentioned.contains(edge.target_id.as_str()) {
                continue;
            }
            let Some(doc) = inner.entities.get(&edge.source_id) else {
                continue;
            };
            if doc.kind != EntityKind::Document || doc.id == source_doc.id {
                continue;
            }
            match &doc.page {
                Some(page) if page.page_id != page_id => {}
                _ => continue,
            }
            shared_by_doc
                .entry(doc.id.clone())
                .or_default()
                .insert(edge.target_id.clone());
        }
        let mut related: Vec<RelatedDocument> = shared_by_doc
            .into_iter()
            .filter_map(|(doc_id, shared)| {
                inner.entities.get(&doc_id).map(|doc| RelatedDocument {
                    document: doc.clone(),
                    shared_entities: shared.len() as u64,
                })
            })
            .collect();
        related.sort_by(|a, b| {
            b.shared_entities
                .cmp(&a.shared_entities)
                .then_with(|| a.document.name.cmp(&b.document.name))
        });
        related.truncate(limit);
        Ok(related)
    }

    async fn facts_as_of(&self, scope: &str, as_of: DateTime<Utc>) -> Result<Vec<FactEdge>> {
        let mut facts: Vec<FactEdge> = self
            .lock()
            .edges
            .values()
            .filter(|e| e.scope == scope && e.is_visible_at(as_of))
            .cloned()
            .collect();
        facts.sort_by(|a, b| b.valid_at.cmp(&a.valid_at));
        Ok(facts)
    }

    async fn search_titles(&self, scope: &str, query: &str) -> Result<Vec<Entity>> {
        let needle = query.to_lowercase();
        let inner = self.lock();
        let mut by_title: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| {
                e.scope == scope
                    && e.kind == EntityKind::Document
                    && e.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        by_title.sort_by(|a, b| a.name.cmp(&b.name));
        let by_mention: Vec<Entity> = inner
            .edges
            .values()
            .filter(|edge| edge.relation == RelationKind::Mentions && edge.expired_at.is_none())
            .filter(|edge| {
                inner
                    .entities
                    .get(&edge.target_id)
                    .is_some_and(|t| t.name.to_lowercase().contains(&needle))
            })
            .filter_map(|edge| inner.entities.get(&edge.source_id))
            .filter(|doc| doc.scope == scope && doc.kind == EntityKind::Document)
            .cloned()
            .collect();
        let mut results = by_title;
        results.extend(by_mention);
        let mut seen = HashSet::new();
        results.retain(|e| seen.insert(e.id.clone()));
        Ok(results)
    }

    async fn stats(&self, scope: &str) -> Result<GraphStats> {
        let inner = self.lock();
        let mut stats = GraphStats::default();
        for entity in inner.entities.values().filter(|e| e.scope == scope) {
            stats.entity_count += 1;
            *stats
                .entities_by_kind
                .entry(entity.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        for edge in inner.edges.values().filter(|e| e.scope == scope) {
            stats.edge_count += 1;
            *stats
                .edges_by_relation
                .entry(edge.relation.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(scope: &str, name: &str) -> Entity {
        Entity::new(scope, EntityKind::Person, name)
    }

    #[tokio::test]
    async fn test_upsert_entity_is_idempotent_on_natural_key() {
        let store = MemoryGraphStore::new();
        let first = store.upsert_entity(&person("ws-1", "Robin")).await.unwrap();
        let second = store.upsert_entity(&person("ws-1", "Robin")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.entities_in_scope("ws-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_case_variants_create_distinct_entities() {
        let store = MemoryGraphStore::new();
        store.upsert_entity(&person("ws-1", "Acme")).await.unwrap();
        store.upsert_entity(&person("ws-1", "ACME")).await.unwrap();
        assert_eq!(store.entities_in_scope("ws-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expire_edge_is_conditional() {
        let store = MemoryGraphStore::new();
        let a = store.upsert_entity(&person("ws-1", "A")).await.unwrap();
        let b = store.upsert_entity(&person("ws-1", "B")).await.unwrap();
        let now = Utc::now();
        let edge = FactEdge::new("ws-1", &a.id, &b.id, RelationKind::Mentions, "A knows B", "p1", now);
        store.insert_edge(&edge).await.unwrap();
        assert!(store.expire_edge(&edge.id, now, now).await.unwrap());
        // The second writer loses the race and must see false.
        assert!(!store.expire_edge(&edge.id, now, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_page_edges_spares_duplicate_edges() {
        let store = MemoryGraphStore::new();
        let a = store.upsert_entity(&person("ws-1", "A")).await.unwrap();
        let b = store.upsert_entity(&person("ws-1", "B")).await.unwrap();
        let now = Utc::now();
        let mention =
            FactEdge::new("ws-1", &a.id, &b.id, RelationKind::Mentions, "A knows B", "p1", now);
        store.insert_edge(&mention).await.unwrap();
        store
            .upsert_duplicate_edge("ws-1", &a.id, &b.id, "A is a duplicate of B", 1.0, MatchTier::Exact, now)
            .await
            .unwrap();
        let expired = store.expire_page_edges("ws-1", "p1", now).await.unwrap();
        assert_eq!(expired, 1);
        let duplicates: Vec<FactEdge> = store
            .all_edges()
            .into_iter()
            .filter(|e| e.relation == RelationKind::DuplicateOf)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert!(duplicates[0].expired_at.is_none());
    }

    #[tokio::test]
    async fn test_backlinks_title_fallback() {
        let store = MemoryGraphStore::new();
        let now = Utc::now();
        let meta = PageMeta {
            page_id: "p1".to_string(),
            slug: "home".to_string(),
            content_len: 10,
            updated_at: now,
        };
        let home = store.upsert_page("ws-1", "Home", &meta).await.unwrap();
        // Link target that has never synced as a page.
        let target = store
            .upsert_entity(&Entity::new("ws-1", EntityKind::Document, "Roadmap"))
            .await
            .unwrap();
        let link = FactEdge::new(
            "ws-1",
            &home.id,
            &target.id,
            RelationKind::LinksTo,
            "Home links to Roadmap",
            "p1",
            now,
        );
        store.insert_edge(&link).await.unwrap();
        let by_title = store.backlinks("ws-1", "p-roadmap", "roadmap").await.unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, home.id);
    }

    #[tokio::test]
    async fn test_repoint_to_missing_endpoint_writes_nothing() {
        let store = MemoryGraphStore::new();
        let a = store.upsert_entity(&person("ws-1", "A")).await.unwrap();
        let b = store.upsert_entity(&person("ws-1", "B")).await.unwrap();
        let now = Utc::now();
        let edge = FactEdge::new("ws-1", &a.id, &b.id, RelationKind::Mentions, "A knows B", "p1", now);
        store.insert_edge(&edge).await.unwrap();

        assert!(!store.repoint_edge(&edge, &a.id, "no-such-id").await.unwrap());
        // The edge survives on its original endpoints.
        let edges = store.all_edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, b.id);
        assert!(edges[0].is_current());
    }

    #[tokio::test]
    async fn test_upsert_duplicate_edge_does_not_grow_graph() {
        let store = MemoryGraphStore::new();
        let a = store.upsert_entity(&person("ws-1", "A")).await.unwrap();
        let b = store.upsert_entity(&person("ws-1", "B")).await.unwrap();
        let now = Utc::now();
        for _ in 0..2 {
            store
                .upsert_duplicate_edge("ws-1", &a.id, &b.id, "A is a duplicate of B", 0.9, MatchTier::Fuzzy, now)
                .await
                .unwrap();
        }
        assert_eq!(store.all_edges().len(), 1);
    }
}
