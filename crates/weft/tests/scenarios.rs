//! End-to-end scenarios over the in-memory store.
//!
//! Each test drives the public engine surface the way the wiki would:
//! page saves through [`SyncEngine`], reads through [`Projections`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use llm::Provider;
use weft::{
    DedupConfig, Entity, EntityKind, FactEdge, GraphStore, HealthGate, MatchTier, MemoryGraphStore,
    PageSave, Projections, RelationKind, SearchTier, SyncConfig, SyncEngine, SyncTier, VectorIndex,
};

/// Provider that replays a fixed queue of completions.
struct CannedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl CannedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl Provider for CannedProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        let mut queue = self.responses.lock().expect("canned responses lock poisoned");
        match queue.pop_front() {
            Some(text) => Ok(text),
            None => anyhow::bail!("canned response queue exhausted"),
        }
    }

    async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embeddings not configured")
    }

    fn supports_embedding(&self) -> bool {
        false
    }
}

fn wired(
    store: Arc<MemoryGraphStore>,
    providers: HashMap<String, Arc<dyn Provider>>,
) -> (SyncEngine, Projections) {
    let health = Arc::new(HealthGate::new(Duration::from_secs(60)));
    let vectors = Arc::new(RwLock::new(VectorIndex::new()));
    let engine = SyncEngine::new(
        store.clone(),
        None,
        health.clone(),
        providers.clone(),
        vectors.clone(),
        SyncConfig::default(),
        DedupConfig::default(),
    );
    let views = Projections::new(store, None, health, providers, vectors);
    (engine, views)
}

fn page_save(
    page_id: &str,
    title: &str,
    previous: Option<&str>,
    content: &str,
    edited_at: DateTime<Utc>,
) -> PageSave {
    PageSave {
        scope: "ws-1".to_string(),
        page_id: page_id.to_string(),
        title: title.to_string(),
        slug: title.to_lowercase().replace(' ', "-"),
        previous: previous.map(str::to_string),
        content: content.to_string(),
        edited_at,
    }
}

#[tokio::test]
async fn scenario_page_edit_supersedes_and_replays_history() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, views) = wired(store.clone(), HashMap::new());

    let t1 = Utc::now();
    let v1 = "Robin has brown hair.";
    engine
        .sync_page(&page_save("p-1", "Home", None, v1, t1))
        .await
        .unwrap();

    // Before the fact became valid there is nothing to see; at t1 it shows.
    let before = views
        .facts_as_of("ws-1", t1 - chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert!(before.is_empty());
    let at_first = views.facts_as_of("ws-1", t1).await.unwrap();
    assert_eq!(at_first.len(), 1);
    assert!(at_first[0].fact.contains("brown"));

    let t2 = t1 + chrono::Duration::seconds(60);
    let outcome = engine
        .sync_page(&page_save("p-1", "Home", Some(v1), "Robin has green hair.", t2))
        .await
        .unwrap();
    assert_eq!(outcome.tier, SyncTier::Rules);
    assert_eq!(outcome.contradictions, 1);

    // Old generation: retired with the new edit's timestamps; new: current.
    let mentions: Vec<_> = store
        .all_edges()
        .into_iter()
        .filter(|e| e.relation == RelationKind::Mentions)
        .collect();
    assert_eq!(mentions.len(), 2);
    let old = mentions.iter().find(|e| e.fact.contains("brown")).unwrap();
    assert_eq!(old.expired_at, Some(t2));
    assert_eq!(old.invalid_at, Some(t2));
    let new = mentions.iter().find(|e| e.fact.contains("green")).unwrap();
    assert!(new.is_current());
    assert_eq!(new.valid_at, t2);

    // One audit record for the mechanical supersession, full confidence.
    let audits = store.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].confidence, 1.0);
    assert_eq!(audits[0].invalidated.len(), 1);
    assert_eq!(audits[0].invalidated[0].fact, "Robin has brown hair.");

    // Replays: the present shows green; the superseded edge is retired and
    // no longer surfaces even for its own era.
    let now_view = views.facts_as_of("ws-1", t2).await.unwrap();
    assert_eq!(now_view.len(), 1);
    assert!(now_view[0].fact.contains("green"));
    assert!(views.facts_as_of("ws-1", t1).await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_backlinks_resolve_by_title_then_page_id() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, views) = wired(store, HashMap::new());

    engine
        .sync_page(&page_save(
            "p-a",
            "Alpha",
            None,
            "Start with [[Design Notes]].",
            Utc::now(),
        ))
        .await
        .unwrap();

    // The target page never synced, so its node carries no page id and the
    // link resolves by title.
    let by_title = views.backlinks("ws-1", "p-d", "Design Notes").await.unwrap();
    assert_eq!(by_title.len(), 1);
    assert_eq!(by_title[0].name, "Alpha");

    engine
        .sync_page(&page_save(
            "p-d",
            "Design Notes",
            None,
            "Decisions live here.",
            Utc::now(),
        ))
        .await
        .unwrap();

    let by_id = views.backlinks("ws-1", "p-d", "Design Notes").await.unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].name, "Alpha");
}

#[tokio::test]
async fn scenario_related_documents_ranked_by_shared_mentions() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, views) = wired(store, HashMap::new());

    engine
        .sync_page(&page_save(
            "p-a",
            "Alpha",
            None,
            "Ticket #ACME-1 assigned to @robin.",
            Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .sync_page(&page_save(
            "p-b",
            "Beta",
            None,
            "Update on #ACME-1 from @robin.",
            Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .sync_page(&page_save("p-c", "Gamma", None, "#ACME-1 status.", Utc::now()))
        .await
        .unwrap();

    let related = views.related("ws-1", "p-a", 5).await.unwrap();
    assert!(related.len() >= 2);
    assert_eq!(related[0].document.page.as_ref().unwrap().page_id, "p-b");
    assert_eq!(related[0].shared_entities, 2);
    assert_eq!(related[1].document.page.as_ref().unwrap().page_id, "p-c");
    assert_eq!(related[1].shared_entities, 1);
}

#[tokio::test]
async fn scenario_typo_task_merged_across_pages() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, _views) = wired(store.clone(), HashMap::new());

    engine
        .sync_page(&page_save(
            "p-a",
            "Alpha",
            None,
            "Work on #ACME-1 continues.",
            Utc::now(),
        ))
        .await
        .unwrap();
    let outcome = engine
        .sync_page(&page_save(
            "p-b",
            "Beta",
            None,
            "Shipped #ACME-01 yesterday.",
            Utc::now(),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.duplicates, 1);

    let typo = store
        .fetch_entity("ws-1", EntityKind::Task, "ACME-01")
        .await
        .unwrap()
        .unwrap();
    let canonical = store
        .fetch_entity("ws-1", EntityKind::Task, "ACME-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        store.duplicate_target(&typo.id).await.unwrap(),
        Some(canonical.id.clone())
    );

    let dup_edges: Vec<_> = store
        .all_edges()
        .into_iter()
        .filter(|e| e.relation == RelationKind::DuplicateOf)
        .collect();
    assert_eq!(dup_edges.len(), 1);
    assert_eq!(dup_edges[0].tier, Some(MatchTier::Fuzzy));

    // Beta's mention now points at the canonical task.
    let touching = store.edges_touching(&canonical.id).await.unwrap();
    let from_beta = touching
        .iter()
        .filter(|e| e.relation == RelationKind::Mentions && e.page_id == "p-b" && e.is_current())
        .count();
    assert_eq!(from_beta, 1);
}

#[tokio::test]
async fn scenario_provider_judges_cross_page_contradiction() {
    let store = Arc::new(MemoryGraphStore::new());

    // An older page already asserted where Robin works.
    let t1 = Utc::now();
    let team_page = store
        .upsert_entity(&Entity::new("ws-1", EntityKind::Document, "Team"))
        .await
        .unwrap();
    let robin = store
        .upsert_entity(&Entity::new("ws-1", EntityKind::Person, "Robin"))
        .await
        .unwrap();
    let mut old_edge = FactEdge::new(
        "ws-1",
        &team_page.id,
        &robin.id,
        RelationKind::Mentions,
        "Robin works at Acme.",
        "p-a",
        t1,
    );
    old_edge.id = "edge-a".to_string();
    store.insert_edge(&old_edge).await.unwrap();

    let provider: Arc<dyn Provider> = Arc::new(CannedProvider::new(vec![
        r#"{"entities": [{"name": "Robin", "type": "person", "fact": "Robin works at Initech."}]}"#,
        r#"{"valid_at": null, "invalid_at": null}"#,
        r#"{"contradicted_ids": ["edge-a"], "rationale": "Robin moved to Initech."}"#,
    ]));
    let mut providers = HashMap::new();
    providers.insert("ws-1".to_string(), provider);
    let (engine, views) = wired(store.clone(), providers);

    let t2 = t1 + chrono::Duration::seconds(120);
    let outcome = engine
        .sync_page(&page_save(
            "p-b",
            "Standup",
            None,
            "Robin works at Initech.",
            t2,
        ))
        .await
        .unwrap();
    assert_eq!(outcome.tier, SyncTier::Provider);
    assert_eq!(outcome.entities, 1);
    assert_eq!(outcome.contradictions, 1);

    // The judged edge is retired; the new assertion governs.
    let edges = store.all_edges();
    let old = edges.iter().find(|e| e.id == "edge-a").unwrap();
    assert_eq!(old.expired_at, Some(t2));
    assert_eq!(old.invalid_at, Some(t2));
    let current: Vec<_> = views.facts_as_of("ws-1", t2).await.unwrap();
    assert_eq!(current.len(), 1);
    assert!(current[0].fact.contains("Initech"));

    let audits = store.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].rationale, "Robin moved to Initech.");
    assert_eq!(audits[0].invalidated.len(), 1);
    assert_eq!(audits[0].invalidated[0].edge_id, "edge-a");
}

#[tokio::test]
async fn scenario_search_falls_back_to_substring_over_titles() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, views) = wired(store, HashMap::new());

    engine
        .sync_page(&page_save(
            "p-1",
            "Release Plan",
            None,
            "Ship #ACME-1 by June.",
            Utc::now(),
        ))
        .await
        .unwrap();

    let hits = views.search("ws-1", "release", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].page_id, "p-1");
    assert_eq!(hits[0].tier, SearchTier::Substring);

    // Entity-name matches map back to the mentioning document.
    let by_mention = views.search("ws-1", "acme", 5).await.unwrap();
    assert_eq!(by_mention.len(), 1);
    assert_eq!(by_mention[0].page_id, "p-1");
}

#[tokio::test]
async fn scenario_stats_reflect_synced_graph() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, views) = wired(store, HashMap::new());

    engine
        .sync_page(&page_save(
            "p-1",
            "Home",
            None,
            "Ticket #ACME-1 assigned to @robin. See [[Roadmap]].",
            Utc::now(),
        ))
        .await
        .unwrap();

    let stats = views.stats("ws-1").await.unwrap();
    // Home + Roadmap documents, the task, and the person at minimum.
    assert!(stats.entity_count >= 4);
    assert_eq!(stats.entities_by_kind.get("document"), Some(&2));
    assert_eq!(stats.entities_by_kind.get("task"), Some(&1));
    assert_eq!(stats.entities_by_kind.get("person"), Some(&1));
    assert!(stats.edges_by_relation.get("LINKS_TO").is_some());
    assert!(stats.edges_by_relation.get("MENTIONS").is_some());
}
