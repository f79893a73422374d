//! Contradiction detection and temporal invalidation
//!
//! When a page asserts a new fact about an entity, the facts other pages
//! currently assert about it are judged against the new one. Contradicted
//! facts are not deleted: their valid-time window is closed and the edge is
//! expired, which keeps them reachable through historical reads.

use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use llm::Provider;

use crate::audit::ContradictionRecord;
use crate::edge::FactEdge;
use crate::entity::Entity;
use crate::extract::extract_json;
use crate::store::GraphStore;

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    contradicted_ids: Vec<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Judge a new fact against the visible facts about an entity and expire
/// the ones it supersedes.
///
/// The provider is consulted exactly once, before any edge is touched;
/// expiry then runs conditionally per edge, so losing a race to another
/// writer skips that edge instead of double-expiring it. Facts asserted by
/// `page_id` itself are excluded from the judged set; superseding a page's
/// own facts is mechanical and needs no judgment call.
///
/// Returns the audit record when at least one fact was invalidated. IDs in
/// the judgment that match no existing fact are ignored.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_contradictions(
    provider: &dyn Provider,
    store: &dyn GraphStore,
    entity: &Entity,
    new_fact: &str,
    page_id: &str,
    valid_from: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    confidence: f32,
) -> Result<Option<ContradictionRecord>> {
    let existing = store
        .visible_facts_about(&entity.scope, &entity.id, page_id)
        .await
        .context("Failed to load facts for contradiction check")?;
    if existing.is_empty() {
        return Ok(None);
    }

    let judgment = judge(provider, &entity.name, new_fact, &existing).await?;
    if judgment.contradicted_ids.is_empty() {
        debug!("No contradictions for {:?}", entity.name);
        return Ok(None);
    }

    // The invalidated facts stop being true when the new one takes over.
    let invalid_at = valid_from.unwrap_or(now);
    let rationale = judgment
        .rationale
        .unwrap_or_else(|| "Superseded by a newer fact".to_string());
    let mut record = ContradictionRecord::new(&entity.scope, page_id, new_fact, rationale, now)
        .with_confidence(confidence);

    for edge in existing
        .iter()
        .filter(|e| judgment.contradicted_ids.contains(&e.id))
    {
        match store.expire_edge(&edge.id, invalid_at, now).await {
            Ok(true) => record.push_invalidated(&edge.id, &edge.fact),
            Ok(false) => debug!("Edge {} was already expired by another writer", edge.id),
            Err(err) => warn!("Failed to expire contradicted edge {}: {err:#}", edge.id),
        }
    }
    if record.invalidated.is_empty() {
        return Ok(None);
    }

    if let Err(err) = store.append_audit(&record).await {
        warn!("Failed to append contradiction audit: {err:#}");
    }
    Ok(Some(record))
}

async fn judge(
    provider: &dyn Provider,
    entity_name: &str,
    new_fact: &str,
    existing: &[FactEdge],
) -> Result<RawJudgment> {
    let mut listing = String::new();
    for edge in existing {
        let _ = writeln!(listing, "- id: {} | fact: {}", edge.id, edge.fact);
    }
    let user = format!(
        "Entity: {entity_name}\nNew fact: {new_fact}\n\nExisting facts:\n{listing}"
    );
    let raw = provider.complete(CONTRADICTION_PROMPT, &user).await?;
    serde_json::from_str(extract_json(&raw)).context("Failed to parse contradiction judgment")
}

const CONTRADICTION_PROMPT: &str = r#"You compare a new fact about an entity against the facts already recorded for it.

Respond with JSON only:
{"contradicted_ids": ["<id>", ...], "rationale": "<one sentence>"}

Rules:
- List the ids of existing facts the new fact makes untrue. The rationale names what changed.
- A fact is contradicted only when both cannot be true at the same time. Additional, unrelated or merely more specific information is not a contradiction.
- When nothing is contradicted, return {"contradicted_ids": []}."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::RelationKind;
    use crate::entity::EntityKind;
    use crate::memory::MemoryGraphStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CannedProvider {
        responses: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl CannedProvider {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for CannedProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .context("No canned response left")
        }

        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("No embedding support")
        }

        fn supports_embedding(&self) -> bool {
            false
        }
    }

    async fn seed_store() -> (MemoryGraphStore, Entity, FactEdge) {
        let store = MemoryGraphStore::new();
        let doc = store
            .upsert_entity(&Entity::new("ws-1", EntityKind::Document, "About Robin"))
            .await
            .unwrap();
        let robin = store
            .upsert_entity(&Entity::new("ws-1", EntityKind::Person, "Robin"))
            .await
            .unwrap();
        let edge = FactEdge::new(
            "ws-1",
            &doc.id,
            &robin.id,
            RelationKind::Mentions,
            "Robin has brown hair.",
            "p-a",
            Utc::now() - chrono::Duration::hours(1),
        );
        store.insert_edge(&edge).await.unwrap();
        (store, robin, edge)
    }

    #[tokio::test]
    async fn test_no_existing_facts_means_no_provider_call() {
        let store = MemoryGraphStore::new();
        let robin = store
            .upsert_entity(&Entity::new("ws-1", EntityKind::Person, "Robin"))
            .await
            .unwrap();
        let provider = CannedProvider::new(&[]);
        let record = resolve_contradictions(
            &provider,
            &store,
            &robin,
            "Robin has green hair.",
            "p-b",
            None,
            Utc::now(),
            0.85,
        )
        .await
        .unwrap();
        assert!(record.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_contradiction_expires_edge_and_audits() {
        let (store, robin, edge) = seed_store().await;
        let judgment = format!(
            r#"{{"contradicted_ids": ["{}"], "rationale": "Hair color changed."}}"#,
            edge.id
        );
        let provider = CannedProvider::new(&[&judgment]);
        let now = Utc::now();
        let valid_from = now - chrono::Duration::minutes(5);
        let record = resolve_contradictions(
            &provider,
            &store,
            &robin,
            "Robin has green hair.",
            "p-b",
            Some(valid_from),
            now,
            0.85,
        )
        .await
        .unwrap()
        .expect("expected a contradiction record");

        assert_eq!(provider.calls(), 1);
        assert_eq!(record.invalidated.len(), 1);
        assert_eq!(record.invalidated[0].fact, "Robin has brown hair.");
        assert_eq!(record.rationale, "Hair color changed.");

        let stored = store
            .all_edges()
            .into_iter()
            .find(|e| e.id == edge.id)
            .unwrap();
        assert_eq!(stored.invalid_at, Some(valid_from));
        assert!(stored.expired_at.is_some());

        let audits = store.audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].new_fact, "Robin has green hair.");
    }

    #[tokio::test]
    async fn test_unknown_judgment_ids_are_ignored() {
        let (store, robin, edge) = seed_store().await;
        let provider = CannedProvider::new(
            &[r#"{"contradicted_ids": ["no-such-edge"], "rationale": "bogus"}"#],
        );
        let record = resolve_contradictions(
            &provider,
            &store,
            &robin,
            "Robin has green hair.",
            "p-b",
            None,
            Utc::now(),
            0.85,
        )
        .await
        .unwrap();
        assert!(record.is_none());
        assert!(store.audits().is_empty());
        let stored = store
            .all_edges()
            .into_iter()
            .find(|e| e.id == edge.id)
            .unwrap();
        assert!(stored.expired_at.is_none());
    }

    #[tokio::test]
    async fn test_same_page_facts_are_not_judged() {
        let (store, robin, _edge) = seed_store().await;
        let provider = CannedProvider::new(&[]);
        // The only existing fact came from p-a; editing p-a again must not
        // send it to the provider.
        let record = resolve_contradictions(
            &provider,
            &store,
            &robin,
            "Robin has green hair.",
            "p-a",
            None,
            Utc::now(),
            0.85,
        )
        .await
        .unwrap();
        assert!(record.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_judgment_writes_nothing() {
        let (store, robin, edge) = seed_store().await;
        let provider = CannedProvider::new(&[r#"{"contradicted_ids": []}"#]);
        let record = resolve_contradictions(
            &provider,
            &store,
            &robin,
            "Robin rides a bike.",
            "p-b",
            None,
            Utc::now(),
            0.85,
        )
        .await
        .unwrap();
        assert!(record.is_none());
        assert_eq!(provider.calls(), 1);
        let stored = store
            .all_edges()
            .into_iter()
            .find(|e| e.id == edge.id)
            .unwrap();
        assert!(stored.expired_at.is_none());
    }
}
