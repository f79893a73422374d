//! Duplicate entity detection and merging
//!
//! Matching runs cheapest-first: exact normalized names, then edit-distance
//! similarity, then embedding cosine, then (when enabled) a provider
//! adjudication call reserved for near misses. The first tier to match a
//! pair wins, and each fresh entity is merged into at most one canonical
//! entity per batch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use llm::Provider;

use crate::edge::MatchTier;
use crate::entity::Entity;
use crate::extract::extract_json;
use crate::store::GraphStore;
use crate::vector::cosine;

/// Pairs scoring below this on every cheap tier are not worth a provider
/// call even when adjudication is enabled.
const ADJUDICATION_FLOOR: f64 = 0.5;

fn default_fuzzy_threshold() -> f64 {
    0.85
}

fn default_embedding_threshold() -> f64 {
    0.85
}

fn default_max_chain_hops() -> usize {
    64
}

/// Duplicate detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Minimum normalized edit-distance similarity for a fuzzy match.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Minimum cosine similarity for an embedding match.
    #[serde(default = "default_embedding_threshold")]
    pub embedding_threshold: f64,
    /// Whether near-miss pairs may be escalated to a provider call.
    #[serde(default)]
    pub adjudication: bool,
    /// Longest DUPLICATE_OF chain followed before reporting an
    /// inconsistent graph.
    #[serde(default = "default_max_chain_hops")]
    pub max_chain_hops: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            embedding_threshold: default_embedding_threshold(),
            adjudication: false,
            max_chain_hops: default_max_chain_hops(),
        }
    }
}

/// A detected duplicate pair, ready to merge.
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub duplicate: Entity,
    pub canonical: Entity,
    pub confidence: f32,
    pub tier: MatchTier,
}

/// Match fresh entities against existing ones.
///
/// The embedding tier runs only when the provider can embed; names are
/// embedded in two batch calls up front, and an embedding failure silently
/// disables that tier for the batch.
pub async fn find_duplicates(
    fresh: &[Entity],
    existing: &[Entity],
    provider: Option<&dyn Provider>,
    context_text: &str,
    config: &DedupConfig,
) -> Vec<DuplicateMatch> {
    let (fresh_vecs, existing_vecs) = embed_names(fresh, existing, provider).await;
    let mut matches = Vec::new();
    for (i, candidate) in fresh.iter().enumerate() {
        for (j, entity) in existing.iter().enumerate() {
            if candidate.id == entity.id || candidate.kind != entity.kind {
                continue;
            }
            if let Some(found) = match_pair(
                candidate,
                entity,
                fresh_vecs[i].as_deref(),
                existing_vecs[j].as_deref(),
                provider,
                context_text,
                config,
            )
            .await
            {
                matches.push(found);
                break;
            }
        }
    }
    matches
}

type NameVectors = Vec<Option<Vec<f32>>>;

async fn embed_names(
    fresh: &[Entity],
    existing: &[Entity],
    provider: Option<&dyn Provider>,
) -> (NameVectors, NameVectors) {
    let mut fresh_vecs: NameVectors = vec![None; fresh.len()];
    let mut existing_vecs: NameVectors = vec![None; existing.len()];
    let Some(provider) = provider else {
        return (fresh_vecs, existing_vecs);
    };
    if !provider.supports_embedding() || fresh.is_empty() || existing.is_empty() {
        return (fresh_vecs, existing_vecs);
    }
    for (entities, slot) in [(fresh, &mut fresh_vecs), (existing, &mut existing_vecs)] {
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        match provider.embed(names).await {
            Ok(vectors) if vectors.len() == entities.len() => {
                *slot = vectors.into_iter().map(Some).collect();
            }
            Ok(_) => debug!("Embedding batch size mismatch; embedding tier disabled"),
            Err(err) => debug!("Embedding entity names failed: {err:#}"),
        }
    }
    (fresh_vecs, existing_vecs)
}

#[allow(clippy::too_many_arguments)]
async fn match_pair(
    candidate: &Entity,
    entity: &Entity,
    candidate_vec: Option<&[f32]>,
    entity_vec: Option<&[f32]>,
    provider: Option<&dyn Provider>,
    context_text: &str,
    config: &DedupConfig,
) -> Option<DuplicateMatch> {
    let matched = |confidence: f32, tier: MatchTier| DuplicateMatch {
        duplicate: candidate.clone(),
        canonical: entity.clone(),
        confidence,
        tier,
    };

    let a = candidate.normalized_name();
    let b = entity.normalized_name();
    if a == b {
        return Some(matched(1.0, MatchTier::Exact));
    }

    let sim = similarity(&a, &b);
    if sim >= config.fuzzy_threshold {
        return Some(matched(sim as f32, MatchTier::Fuzzy));
    }
    let mut best = sim;

    if let (Some(av), Some(bv)) = (candidate_vec, entity_vec) {
        let cos = f64::from(cosine(av, bv));
        if cos >= config.embedding_threshold {
            return Some(matched(cos as f32, MatchTier::Embedding));
        }
        best = best.max(cos);
    }

    if config.adjudication && best >= ADJUDICATION_FLOOR {
        if let Some(provider) = provider {
            match adjudicate(provider, candidate, entity, context_text).await {
                Ok(Some(confidence)) => {
                    return Some(matched(confidence, MatchTier::Adjudicated))
                }
                Ok(None) => {}
                Err(err) => debug!(
                    "Adjudication failed for {:?} vs {:?}: {err:#}",
                    candidate.name, entity.name
                ),
            }
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct RawAdjudication {
    #[serde(default)]
    duplicate: bool,
    #[serde(default = "default_adjudication_confidence")]
    confidence: f32,
}

fn default_adjudication_confidence() -> f32 {
    0.75
}

async fn adjudicate(
    provider: &dyn Provider,
    candidate: &Entity,
    entity: &Entity,
    context_text: &str,
) -> Result<Option<f32>> {
    let user = format!(
        "Entity A: {} ({})\nEntity B: {} ({})\n\nPage context:\n{}",
        candidate.name, candidate.kind, entity.name, entity.kind, context_text
    );
    let raw = provider.complete(ADJUDICATION_PROMPT, &user).await?;
    let parsed: RawAdjudication = serde_json::from_str(extract_json(&raw))
        .context("Failed to parse adjudication response")?;
    Ok(parsed
        .duplicate
        .then_some(parsed.confidence.clamp(0.0, 1.0)))
}

/// Merge a duplicate entity into its canonical entity.
///
/// Un-expired edges touching the duplicate are re-pointed one by one (a
/// re-point that would self-loop on the canonical entity is skipped), then
/// the DUPLICATE_OF edge is upserted. Safe to repeat: a second run finds no
/// edges left to move and refreshes the duplicate edge in place. Returns
/// how many edges were re-pointed.
pub async fn merge_nodes(
    store: &dyn GraphStore,
    matched: &DuplicateMatch,
    now: DateTime<Utc>,
) -> Result<usize> {
    let duplicate = &matched.duplicate;
    let canonical = &matched.canonical;
    if duplicate.id == canonical.id {
        warn!("Refusing to merge {:?} into itself", duplicate.name);
        return Ok(0);
    }

    let edges = store
        .edges_touching(&duplicate.id)
        .await
        .context("Failed to list edges for merge")?;
    let mut transferred = 0usize;
    for edge in &edges {
        let new_source = if edge.source_id == duplicate.id {
            &canonical.id
        } else {
            &edge.source_id
        };
        let new_target = if edge.target_id == duplicate.id {
            &canonical.id
        } else {
            &edge.target_id
        };
        if new_source == new_target {
            continue;
        }
        match store.repoint_edge(edge, new_source, new_target).await {
            Ok(true) => transferred += 1,
            Ok(false) => debug!("Edge {} changed during merge; skipped", edge.id),
            Err(err) => warn!("Failed to re-point edge {}: {err:#}", edge.id),
        }
    }

    let fact = format!("{} is a duplicate of {}", duplicate.name, canonical.name);
    store
        .upsert_duplicate_edge(
            &duplicate.scope,
            &duplicate.id,
            &canonical.id,
            &fact,
            matched.confidence,
            matched.tier,
            now,
        )
        .await
        .context("Failed to record duplicate relationship")?;
    info!(
        "Merged {:?} into {:?} ({} edges moved, {} match)",
        duplicate.name,
        canonical.name,
        transferred,
        matched.tier.as_str()
    );
    Ok(transferred)
}

/// Follow the DUPLICATE_OF chain from an entity to its canonical entity.
///
/// Bounded by `max_hops`; a cycle or an over-long chain is a stored-data
/// inconsistency, not a reason to spin.
pub async fn resolve_canonical(
    store: &dyn GraphStore,
    entity_id: &str,
    max_hops: usize,
) -> Result<String> {
    let mut current = entity_id.to_string();
    for _ in 0..max_hops {
        match store.duplicate_target(&current).await? {
            Some(next) => {
                if next == current {
                    return Err(common::Error::Inconsistent(format!(
                        "DUPLICATE_OF self-cycle at entity {current}"
                    ))
                    .into());
                }
                current = next;
            }
            None => return Ok(current),
        }
    }
    Err(common::Error::Inconsistent(format!(
        "DUPLICATE_OF chain from {entity_id} exceeds {max_hops} hops"
    ))
    .into())
}

/// Edit distance over characters, two-row dynamic programming.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Edit-distance similarity in `[0, 1]`; empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

const ADJUDICATION_PROMPT: &str = r#"You decide whether two entity names from the same workspace refer to the same thing.

Respond with JSON only:
{"duplicate": true|false, "confidence": <0.0-1.0>}

Rules:
- Consider abbreviations, alternate spellings and renames. Different things with similar names are not duplicates.
- Use the page context only to disambiguate; absence of context is not evidence either way."#;
