//! Graph persistence
//!
//! The [`GraphStore`] trait is the seam between the sync engine and the
//! backing graph. [`FalkorStore`] implements it over `GRAPH.QUERY`; the
//! in-memory implementation in [`crate::memory`] backs tests.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings so Cypher
//! string comparison agrees with chronological order.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use db::{GraphClient, GraphConfig, Param, Scalar};

use crate::audit::ContradictionRecord;
use crate::edge::{parse_match_tier, parse_relation_kind, FactEdge, MatchTier, RelationKind};
use crate::entity::{parse_entity_kind, Entity, EntityKind, PageMeta};

/// A document ranked by how many mentioned entities it shares with another.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedDocument {
    pub document: Entity,
    pub shared_entities: u64,
}

/// Per-scope graph counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub entity_count: u64,
    pub edge_count: u64,
    pub entities_by_kind: BTreeMap<String, u64>,
    pub edges_by_relation: BTreeMap<String, u64>,
}

/// Persistence operations the sync engine and read API are built on.
///
/// Edges are never mutated in place: a newer generation expires the prior
/// one, and expiry is conditional so concurrent writers cannot expire the
/// same edge twice.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert an entity by its `(scope, kind, name)` natural key.
    ///
    /// Returns the stored entity, whose ID may differ from the input when
    /// the key already existed.
    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity>;

    /// Look up an entity by natural key.
    async fn fetch_entity(
        &self,
        scope: &str,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<Entity>>;

    /// Look up an entity by internal ID.
    async fn fetch_entity_by_id(&self, id: &str) -> Result<Option<Entity>>;

    /// All entities in a scope, ordered by name.
    async fn entities_in_scope(&self, scope: &str) -> Result<Vec<Entity>>;

    /// Record the embedding index key for an entity.
    async fn set_entity_embedding(&self, id: &str, key: &str) -> Result<()>;

    /// Upsert the Document entity backing a wiki page and refresh its
    /// page metadata.
    async fn upsert_page(&self, scope: &str, title: &str, meta: &PageMeta) -> Result<Entity>;

    /// Insert a new edge; fails if either endpoint is missing.
    async fn insert_edge(&self, edge: &FactEdge) -> Result<()>;

    /// The un-expired edge for a `(source, relation, target)` triple, if any.
    async fn current_edge(
        &self,
        scope: &str,
        source_id: &str,
        relation: RelationKind,
        target_id: &str,
    ) -> Result<Option<FactEdge>>;

    /// Conditionally expire an edge.
    ///
    /// Returns `false` when the edge was already expired (or gone), so a
    /// concurrent writer that lost the race can tell.
    async fn expire_edge(
        &self,
        edge_id: &str,
        invalid_at: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Currently-visible MENTIONS facts about an entity, excluding those
    /// asserted by the given page.
    async fn visible_facts_about(
        &self,
        scope: &str,
        entity_id: &str,
        exclude_page_id: &str,
    ) -> Result<Vec<FactEdge>>;

    /// Expire every un-expired edge a page asserted. Duplicate edges are
    /// system-derived and survive page removal. Returns how many were
    /// expired.
    async fn expire_page_edges(
        &self,
        scope: &str,
        page_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Un-expired non-duplicate edges attached to an entity, either
    /// direction.
    async fn edges_touching(&self, entity_id: &str) -> Result<Vec<FactEdge>>;

    /// Move an edge onto new endpoints, preserving its identity and
    /// temporal fields.
    ///
    /// Returns `false` when the edge was expired or removed in the
    /// meantime, or when either new endpoint is missing; nothing is
    /// written in any of those cases.
    async fn repoint_edge(
        &self,
        edge: &FactEdge,
        new_source: &str,
        new_target: &str,
    ) -> Result<bool>;

    /// Upsert the DUPLICATE_OF edge from a duplicate entity to its
    /// canonical entity. Repeating the call refreshes confidence and tier
    /// without growing the graph.
    #[allow(clippy::too_many_arguments)]
    async fn upsert_duplicate_edge(
        &self,
        scope: &str,
        duplicate_id: &str,
        canonical_id: &str,
        fact: &str,
        confidence: f32,
        tier: MatchTier,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// The canonical entity this entity was merged into, if any.
    async fn duplicate_target(&self, entity_id: &str) -> Result<Option<String>>;

    /// Append a contradiction audit record.
    async fn append_audit(&self, record: &ContradictionRecord) -> Result<()>;

    /// Documents holding an un-expired link to the given page, matched by
    /// page ID or, for links to pages that never synced, by title.
    async fn backlinks(&self, scope: &str, page_id: &str, title: &str) -> Result<Vec<Entity>>;

    /// Documents ranked by shared mentioned entities, most shared first.
    async fn related_documents(
        &self,
        scope: &str,
        page_id: &str,
        limit: usize,
    ) -> Result<Vec<RelatedDocument>>;

    /// Every fact edge visible at `as_of`, newest valid-from first.
    async fn facts_as_of(&self, scope: &str, as_of: DateTime<Utc>) -> Result<Vec<FactEdge>>;

    /// Documents whose title contains the query, plus documents mentioning
    /// an entity whose name contains it. Title matches come first.
    async fn search_titles(&self, scope: &str, query: &str) -> Result<Vec<Entity>>;

    /// Graph counters for a scope.
    async fn stats(&self, scope: &str) -> Result<GraphStats>;
}

const ENTITY_PROJECTION: &str = "e.id, e.scope, e.kind, e.name, e.last_seen, \
     e.embedding_key, e.page_id, e.slug, e.content_len, e.updated_at";

const EDGE_PROJECTION: &str = "src.id, tgt.id, type(r), r.id, r.scope, r.fact, \
     r.page_id, r.created_at, r.expired_at, r.valid_at, r.invalid_at, \
     r.embedding_key, r.confidence, r.tier";

const EDGE_PROPS: &str = "{id: $id, scope: $scope, fact: $fact, page_id: $page_id, \
     created_at: $created_at, expired_at: $expired_at, valid_at: $valid_at, \
     invalid_at: $invalid_at, embedding_key: $embedding_key, \
     confidence: $confidence, tier: $tier}";

/// Fixed-width RFC 3339 rendering used for every stored timestamp.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {value}"))
}

fn opt_ts(scalar: &Scalar) -> Result<Option<DateTime<Utc>>> {
    match scalar.as_str() {
        Some(s) => Ok(Some(parse_ts(s)?)),
        None => Ok(None),
    }
}

fn req_str(row: &[Scalar], idx: usize, field: &str) -> Result<String> {
    row[idx]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("Result row missing {field}"))
}

fn parse_entity_row(row: &[Scalar]) -> Result<Entity> {
    if row.len() < 10 {
        return Err(
            common::Error::Store(format!("Malformed entity row: {} columns", row.len())).into(),
        );
    }
    let last_seen = parse_ts(&req_str(row, 4, "last_seen")?)?;
    let page = match row[6].as_str() {
        Some(page_id) => {
            let updated_at = match row[9].as_str() {
                Some(s) => parse_ts(s)?,
                None => last_seen,
            };
            Some(PageMeta {
                page_id: page_id.to_string(),
                slug: row[7].as_str().unwrap_or_default().to_string(),
                content_len: row[8].as_i64().unwrap_or(0).max(0) as usize,
                updated_at,
            })
        }
        None => None,
    };
    Ok(Entity {
        id: req_str(row, 0, "id")?,
        scope: req_str(row, 1, "scope")?,
        kind: parse_entity_kind(row[2].as_str().unwrap_or_default()),
        name: req_str(row, 3, "name")?,
        last_seen,
        embedding_key: row[5].as_str().map(str::to_string),
        page,
    })
}

fn parse_edge_row(row: &[Scalar]) -> Result<FactEdge> {
    if row.len() < 14 {
        return Err(
            common::Error::Store(format!("Malformed edge row: {} columns", row.len())).into(),
        );
    }
    let relation_str = req_str(row, 2, "relation")?;
    let relation = parse_relation_kind(&relation_str)
        .with_context(|| format!("Unknown relation kind: {relation_str}"))?;
    Ok(FactEdge {
        id: req_str(row, 3, "id")?,
        scope: req_str(row, 4, "scope")?,
        source_id: req_str(row, 0, "source id")?,
        target_id: req_str(row, 1, "target id")?,
        relation,
        fact: req_str(row, 5, "fact")?,
        page_id: row[6].as_str().unwrap_or_default().to_string(),
        created_at: parse_ts(&req_str(row, 7, "created_at")?)?,
        expired_at: opt_ts(&row[8])?,
        valid_at: parse_ts(&req_str(row, 9, "valid_at")?)?,
        invalid_at: opt_ts(&row[10])?,
        embedding_key: row[11].as_str().map(str::to_string),
        confidence: row[12].as_f64().map(|v| v as f32),
        tier: row[13].as_str().and_then(parse_match_tier),
    })
}

fn edge_params(edge: &FactEdge) -> Vec<(&'static str, Param)> {
    vec![
        ("id", Param::str(&edge.id)),
        ("scope", Param::str(&edge.scope)),
        ("fact", Param::str(&edge.fact)),
        ("page_id", Param::str(&edge.page_id)),
        ("created_at", Param::str(ts(edge.created_at))),
        ("expired_at", Param::opt_str(edge.expired_at.map(ts))),
        ("valid_at", Param::str(ts(edge.valid_at))),
        ("invalid_at", Param::opt_str(edge.invalid_at.map(ts))),
        ("embedding_key", Param::opt_str(edge.embedding_key.clone())),
        (
            "confidence",
            match edge.confidence {
                Some(c) => Param::Float(f64::from(c)),
                None => Param::Null,
            },
        ),
        (
            "tier",
            Param::opt_str(edge.tier.map(|t| t.as_str().to_string())),
        ),
    ]
}

/// Endpoint swap as one statement: the replacement is created and the
/// original deleted in the same query, which the store executes atomically.
/// A missing endpoint or an already-expired edge matches nothing, and
/// nothing is written.
fn repoint_query(relation: RelationKind) -> String {
    format!(
        "MATCH (src:Entity {{id: $source_id}}), (tgt:Entity {{id: $target_id}}) \
         MATCH ()-[r:{rel}]->() WHERE r.id = $id AND r.expired_at IS NULL \
         CREATE (src)-[n:{rel} {props}]->(tgt) \
         DELETE r \
         RETURN count(r)",
        rel = relation.as_str(),
        props = EDGE_PROPS,
    )
}

fn count_from(result: &db::ResultSet) -> u64 {
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|s| s.as_i64())
        .unwrap_or(0)
        .max(0) as u64
}

/// [`GraphStore`] backed by a FalkorDB graph.
#[derive(Clone)]
pub struct FalkorStore {
    client: GraphClient,
}

impl FalkorStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        Ok(Self {
            client: GraphClient::connect(config).await?,
        })
    }
}

#[async_trait]
impl GraphStore for FalkorStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        let query = format!(
            "MERGE (e:Entity {{scope: $scope, kind: $kind, name: $name}}) \
             ON CREATE SET e.id = $id \
             SET e.last_seen = $last_seen \
             RETURN {ENTITY_PROJECTION}"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(&entity.scope)),
                    ("kind", Param::str(entity.kind.as_str())),
                    ("name", Param::str(&entity.name)),
                    ("id", Param::str(&entity.id)),
                    ("last_seen", Param::str(ts(entity.last_seen))),
                ],
            )
            .await
            .context("Failed to upsert entity")?;
        let row = result
            .rows
            .first()
            .context("Entity upsert returned no row")?;
        parse_entity_row(row)
    }

    async fn fetch_entity(
        &self,
        scope: &str,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<Entity>> {
        let query = format!(
            "MATCH (e:Entity {{scope: $scope, kind: $kind, name: $name}}) \
             RETURN {ENTITY_PROJECTION} LIMIT 1"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("kind", Param::str(kind.as_str())),
                    ("name", Param::str(name)),
                ],
            )
            .await
            .context("Failed to fetch entity")?;
        result.rows.first().map(|row| parse_entity_row(row)).transpose()
    }

    async fn fetch_entity_by_id(&self, id: &str) -> Result<Option<Entity>> {
        let query = format!(
            "MATCH (e:Entity {{id: $id}}) RETURN {ENTITY_PROJECTION} LIMIT 1"
        );
        let result = self
            .client
            .query(&query, &[("id", Param::str(id))])
            .await
            .context("Failed to fetch entity by id")?;
        result.rows.first().map(|row| parse_entity_row(row)).transpose()
    }

    async fn entities_in_scope(&self, scope: &str) -> Result<Vec<Entity>> {
        let query = format!(
            "MATCH (e:Entity {{scope: $scope}}) \
             RETURN {ENTITY_PROJECTION} ORDER BY e.name"
        );
        let result = self
            .client
            .query(&query, &[("scope", Param::str(scope))])
            .await
            .context("Failed to list entities")?;
        result.rows.iter().map(|row| parse_entity_row(row)).collect()
    }

    async fn set_entity_embedding(&self, id: &str, key: &str) -> Result<()> {
        self.client
            .query(
                "MATCH (e:Entity {id: $id}) SET e.embedding_key = $key",
                &[("id", Param::str(id)), ("key", Param::str(key))],
            )
            .await
            .context("Failed to set entity embedding key")?;
        Ok(())
    }

    async fn upsert_page(&self, scope: &str, title: &str, meta: &PageMeta) -> Result<Entity> {
        let query = format!(
            "MERGE (e:Entity {{scope: $scope, kind: $kind, name: $name}}) \
             ON CREATE SET e.id = $id \
             SET e.last_seen = $updated_at, e.page_id = $page_id, e.slug = $slug, \
                 e.content_len = $content_len, e.updated_at = $updated_at \
             RETURN {ENTITY_PROJECTION}"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("kind", Param::str(EntityKind::Document.as_str())),
                    ("name", Param::str(title)),
                    ("id", Param::str(Uuid::new_v4().to_string())),
                    ("page_id", Param::str(&meta.page_id)),
                    ("slug", Param::str(&meta.slug)),
                    ("content_len", Param::Int(meta.content_len as i64)),
                    ("updated_at", Param::str(ts(meta.updated_at))),
                ],
            )
            .await
            .context("Failed to upsert page")?;
        let row = result.rows.first().context("Page upsert returned no row")?;
        parse_entity_row(row)
    }

    async fn insert_edge(&self, edge: &FactEdge) -> Result<()> {
        let query = format!(
            "MATCH (src:Entity {{id: $source_id}}), (tgt:Entity {{id: $target_id}}) \
             CREATE (src)-[r:{rel} {props}]->(tgt) \
             RETURN r.id",
            rel = edge.relation.as_str(),
            props = EDGE_PROPS,
        );
        let mut params = edge_params(edge);
        params.push(("source_id", Param::str(&edge.source_id)));
        params.push(("target_id", Param::str(&edge.target_id)));
        let result = self
            .client
            .query(&query, &params)
            .await
            .context("Failed to insert edge")?;
        if result.is_empty() {
            bail!(
                "Edge endpoints not found: {} -> {}",
                edge.source_id,
                edge.target_id
            );
        }
        Ok(())
    }

    async fn current_edge(
        &self,
        scope: &str,
        source_id: &str,
        relation: RelationKind,
        target_id: &str,
    ) -> Result<Option<FactEdge>> {
        let query = format!(
            "MATCH (src:Entity {{id: $source_id}})-[r:{rel}]->(tgt:Entity {{id: $target_id}}) \
             WHERE r.scope = $scope AND r.expired_at IS NULL \
             RETURN {EDGE_PROJECTION} LIMIT 1",
            rel = relation.as_str(),
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("source_id", Param::str(source_id)),
                    ("target_id", Param::str(target_id)),
                ],
            )
            .await
            .context("Failed to fetch current edge")?;
        result.rows.first().map(|row| parse_edge_row(row)).transpose()
    }

    async fn expire_edge(
        &self,
        edge_id: &str,
        invalid_at: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = self
            .client
            .query(
                "MATCH ()-[r]->() WHERE r.id = $id AND r.expired_at IS NULL \
                 SET r.expired_at = $expired_at, r.invalid_at = $invalid_at \
                 RETURN r.id",
                &[
                    ("id", Param::str(edge_id)),
                    ("expired_at", Param::str(ts(expired_at))),
                    ("invalid_at", Param::str(ts(invalid_at))),
                ],
            )
            .await
            .context("Failed to expire edge")?;
        Ok(!result.is_empty())
    }

    async fn visible_facts_about(
        &self,
        scope: &str,
        entity_id: &str,
        exclude_page_id: &str,
    ) -> Result<Vec<FactEdge>> {
        let query = format!(
            "MATCH (src:Entity)-[r:MENTIONS]->(tgt:Entity {{id: $entity_id}}) \
             WHERE r.scope = $scope AND r.page_id <> $page_id \
             AND r.expired_at IS NULL AND r.valid_at <= $now \
             AND (r.invalid_at IS NULL OR r.invalid_at > $now) \
             RETURN {EDGE_PROJECTION}"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("entity_id", Param::str(entity_id)),
                    ("page_id", Param::str(exclude_page_id)),
                    ("now", Param::str(ts(Utc::now()))),
                ],
            )
            .await
            .context("Failed to load visible facts")?;
        result.rows.iter().map(|row| parse_edge_row(row)).collect()
    }

    async fn expire_page_edges(
        &self,
        scope: &str,
        page_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = self
            .client
            .query(
                "MATCH ()-[r]->() \
                 WHERE r.scope = $scope AND r.page_id = $page_id \
                 AND r.expired_at IS NULL AND type(r) <> 'DUPLICATE_OF' \
                 SET r.expired_at = $now, r.invalid_at = $now \
                 RETURN count(r)",
                &[
                    ("scope", Param::str(scope)),
                    ("page_id", Param::str(page_id)),
                    ("now", Param::str(ts(now))),
                ],
            )
            .await
            .context("Failed to expire page edges")?;
        Ok(count_from(&result))
    }

    async fn edges_touching(&self, entity_id: &str) -> Result<Vec<FactEdge>> {
        let outgoing = format!(
            "MATCH (src:Entity {{id: $entity_id}})-[r]->(tgt:Entity) \
             WHERE r.expired_at IS NULL AND type(r) <> 'DUPLICATE_OF' \
             RETURN {EDGE_PROJECTION}"
        );
        let incoming = format!(
            "MATCH (src:Entity)-[r]->(tgt:Entity {{id: $entity_id}}) \
             WHERE r.expired_at IS NULL AND type(r) <> 'DUPLICATE_OF' \
             RETURN {EDGE_PROJECTION}"
        );
        let mut edges = Vec::new();
        for query in [outgoing, incoming] {
            let result = self
                .client
                .query(&query, &[("entity_id", Param::str(entity_id))])
                .await
                .context("Failed to list edges touching entity")?;
            for row in &result.rows {
                edges.push(parse_edge_row(row)?);
            }
        }
        // Self-loops come back from both queries.
        let mut seen = HashSet::new();
        edges.retain(|e| seen.insert(e.id.clone()));
        Ok(edges)
    }

    async fn repoint_edge(
        &self,
        edge: &FactEdge,
        new_source: &str,
        new_target: &str,
    ) -> Result<bool> {
        let query = repoint_query(edge.relation);
        let mut params = edge_params(edge);
        params.push(("source_id", Param::str(new_source)));
        params.push(("target_id", Param::str(new_target)));
        let result = self
            .client
            .query(&query, &params)
            .await
            .context("Failed to re-point edge")?;
        Ok(count_from(&result) > 0)
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
        let result = self
            .client
            .query(
                "MATCH (src:Entity {id: $duplicate_id}), (tgt:Entity {id: $canonical_id}) \
                 MERGE (src)-[r:DUPLICATE_OF]->(tgt) \
                 ON CREATE SET r.id = $id, r.scope = $scope, r.fact = $fact, \
                     r.page_id = '', r.created_at = $now, r.valid_at = $now \
                 SET r.confidence = $confidence, r.tier = $tier \
                 RETURN r.id",
                &[
                    ("duplicate_id", Param::str(duplicate_id)),
                    ("canonical_id", Param::str(canonical_id)),
                    ("id", Param::str(Uuid::new_v4().to_string())),
                    ("scope", Param::str(scope)),
                    ("fact", Param::str(fact)),
                    ("now", Param::str(ts(now))),
                    ("confidence", Param::Float(f64::from(confidence))),
                    ("tier", Param::str(tier.as_str())),
                ],
            )
            .await
            .context("Failed to upsert duplicate edge")?;
        if result.is_empty() {
            bail!("Duplicate edge endpoints not found: {duplicate_id} -> {canonical_id}");
        }
        Ok(())
    }

    async fn duplicate_target(&self, entity_id: &str) -> Result<Option<String>> {
        let result = self
            .client
            .query(
                "MATCH (src:Entity {id: $entity_id})-[r:DUPLICATE_OF]->(tgt:Entity) \
                 WHERE r.expired_at IS NULL \
                 RETURN tgt.id LIMIT 1",
                &[("entity_id", Param::str(entity_id))],
            )
            .await
            .context("Failed to resolve duplicate target")?;
        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|s| s.as_str())
            .map(str::to_string))
    }

    async fn append_audit(&self, record: &ContradictionRecord) -> Result<()> {
        let invalidated = serde_json::to_string(&record.invalidated)
            .context("Failed to encode invalidated facts")?;
        self.client
            .query(
                "CREATE (a:ContradictionAudit {id: $id, scope: $scope, \
                 page_id: $page_id, new_fact: $new_fact, invalidated: $invalidated, \
                 rationale: $rationale, strategy: $strategy, \
                 confidence: $confidence, created_at: $created_at})",
                &[
                    ("id", Param::str(&record.id)),
                    ("scope", Param::str(&record.scope)),
                    ("page_id", Param::str(&record.page_id)),
                    ("new_fact", Param::str(&record.new_fact)),
                    ("invalidated", Param::str(invalidated)),
                    ("rationale", Param::str(&record.rationale)),
                    ("strategy", Param::str(&record.strategy)),
                    ("confidence", Param::Float(f64::from(record.confidence))),
                    ("created_at", Param::str(ts(record.created_at))),
                ],
            )
            .await
            .context("Failed to append contradiction audit")?;
        Ok(())
    }

    async fn backlinks(&self, scope: &str, page_id: &str, title: &str) -> Result<Vec<Entity>> {
        let query = format!(
            "MATCH (e:Entity)-[r:LINKS_TO]->(tgt:Entity) \
             WHERE r.scope = $scope AND r.expired_at IS NULL \
             AND (tgt.page_id = $page_id \
                  OR (tgt.page_id IS NULL AND toLower(tgt.name) = toLower($title))) \
             RETURN {ENTITY_PROJECTION} ORDER BY e.name"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("page_id", Param::str(page_id)),
                    ("title", Param::str(title)),
                ],
            )
            .await
            .context("Failed to list backlinks")?;
        result.rows.iter().map(|row| parse_entity_row(row)).collect()
    }

    async fn related_documents(
        &self,
        scope: &str,
        page_id: &str,
        limit: usize,
    ) -> Result<Vec<RelatedDocument>> {
        let query = format!(
            "MATCH (d:Entity {{scope: $scope, page_id: $page_id}})\
             -[r1:MENTIONS]->(x:Entity)<-[r2:MENTIONS]-(e:Entity) \
             WHERE r1.expired_at IS NULL AND r2.expired_at IS NULL \
             AND e.kind = 'document' AND e.page_id <> $page_id \
             RETURN {ENTITY_PROJECTION}, count(DISTINCT x) AS shared \
             ORDER BY shared DESC, e.name ASC LIMIT {limit}"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("page_id", Param::str(page_id)),
                ],
            )
            .await
            .context("Failed to list related documents")?;
        let mut related = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let document = parse_entity_row(row)?;
            let shared_entities = row
                .get(10)
                .and_then(|s| s.as_i64())
                .unwrap_or(0)
                .max(0) as u64;
            related.push(RelatedDocument {
                document,
                shared_entities,
            });
        }
        Ok(related)
    }

    async fn facts_as_of(&self, scope: &str, as_of: DateTime<Utc>) -> Result<Vec<FactEdge>> {
        let query = format!(
            "MATCH (src:Entity)-[r]->(tgt:Entity) \
             WHERE r.scope = $scope AND r.expired_at IS NULL \
             AND r.valid_at <= $as_of \
             AND (r.invalid_at IS NULL OR r.invalid_at > $as_of) \
             RETURN {EDGE_PROJECTION} ORDER BY r.valid_at DESC"
        );
        let result = self
            .client
            .query(
                &query,
                &[
                    ("scope", Param::str(scope)),
                    ("as_of", Param::str(ts(as_of))),
                ],
            )
            .await
            .context("Failed to load facts as of timestamp")?;
        result.rows.iter().map(|row| parse_edge_row(row)).collect()
    }

    async fn search_titles(&self, scope: &str, query: &str) -> Result<Vec<Entity>> {
        let needle = query.to_lowercase();
        let by_title = format!(
            "MATCH (e:Entity {{scope: $scope, kind: 'document'}}) \
             WHERE toLower(e.name) CONTAINS $needle \
             RETURN {ENTITY_PROJECTION} ORDER BY e.name"
        );
        let by_mention = format!(
            "MATCH (e:Entity {{scope: $scope, kind: 'document'}})-[r:MENTIONS]->(x:Entity) \
             WHERE r.expired_at IS NULL AND toLower(x.name) CONTAINS $needle \
             RETURN DISTINCT {ENTITY_PROJECTION}"
        );
        let params = [
            ("scope", Param::str(scope)),
            ("needle", Param::str(&needle)),
        ];
        let mut entities = Vec::new();
        for q in [by_title, by_mention] {
            let result = self
                .client
                .query(&q, &params)
                .await
                .context("Failed to search document titles")?;
            for row in &result.rows {
                entities.push(parse_entity_row(row)?);
            }
        }
        let mut seen = HashSet::new();
        entities.retain(|e| seen.insert(e.id.clone()));
        Ok(entities)
    }

    async fn stats(&self, scope: &str) -> Result<GraphStats> {
        let mut stats = GraphStats::default();
        let entities = self
            .client
            .query(
                "MATCH (e:Entity {scope: $scope}) RETURN e.kind, count(e)",
                &[("scope", Param::str(scope))],
            )
            .await
            .context("Failed to count entities")?;
        for row in &entities.rows {
            let kind = row
                .first()
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            let count = row.get(1).and_then(|s| s.as_i64()).unwrap_or(0).max(0) as u64;
            stats.entity_count += count;
            stats.entities_by_kind.insert(kind, count);
        }
        let edges = self
            .client
            .query(
                "MATCH ()-[r]->() WHERE r.scope = $scope RETURN type(r), count(r)",
                &[("scope", Param::str(scope))],
            )
            .await
            .context("Failed to count edges")?;
        for row in &edges.rows {
            let relation = row
                .first()
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            let count = row.get(1).and_then(|s| s.as_i64()).unwrap_or(0).max(0) as u64;
            stats.edge_count += count;
            stats.edges_by_relation.insert(relation, count);
        }
        Ok(stats)
    }
}
