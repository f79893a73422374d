//! Entity nodes and extraction shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of entity kinds the graph tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Document,
    Concept,
    Person,
    Task,
    Project,
}

impl EntityKind {
    /// All kinds, in extraction-preference order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Document,
        EntityKind::Person,
        EntityKind::Task,
        EntityKind::Project,
        EntityKind::Concept,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Document => "document",
            EntityKind::Concept => "concept",
            EntityKind::Person => "person",
            EntityKind::Task => "task",
            EntityKind::Project => "project",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse an entity kind from a string (case-insensitive).
///
/// Unknown kinds fall back to `Concept`.
pub fn parse_entity_kind(s: &str) -> EntityKind {
    match s.to_lowercase().as_str() {
        "document" | "wikipage" | "page" => EntityKind::Document,
        "person" | "user" => EntityKind::Person,
        "task" | "issue" => EntityKind::Task,
        "project" => EntityKind::Project,
        _ => EntityKind::Concept,
    }
}

/// Case/whitespace-normalized form of an entity name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Page metadata carried on Document entities that back a wiki page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Stable page ID from the editing surface
    pub page_id: String,
    pub slug: String,
    /// Length of the page content at last sync
    pub content_len: usize,
    pub updated_at: DateTime<Utc>,
}

/// An entity node in the knowledge graph.
///
/// Within one scope, `(kind, name)` is the natural key used for upserts;
/// internal IDs are stable once assigned and never reused. Entities are
/// never deleted, only merged into a canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable internal ID
    pub id: String,
    /// Tenant/workspace partition key
    pub scope: String,
    pub kind: EntityKind,
    /// Display name, verbatim as first extracted
    pub name: String,
    /// When this entity was last mentioned by any page
    pub last_seen: DateTime<Utc>,
    /// Key into the embedding index, if an embedding was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_key: Option<String>,
    /// Present on Document entities that back a wiki page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageMeta>,
}

impl Entity {
    /// Create a new entity with a generated ID.
    pub fn new(scope: impl Into<String>, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scope: scope.into(),
            kind,
            name: name.into(),
            last_seen: Utc::now(),
            embedding_key: None,
            page: None,
        }
    }

    pub fn with_page(mut self, page: PageMeta) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_embedding_key(mut self, key: impl Into<String>) -> Self {
        self.embedding_key = Some(key.into());
        self
    }

    /// Case-normalized name used by exact duplicate matching.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// A freshly extracted entity, shared by every extraction tier before commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// The sentence asserting this entity, used for contradiction comparison
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact: Option<String>,
}

impl RawEntity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fact: None,
        }
    }

    pub fn with_fact(mut self, fact: impl Into<String>) -> Self {
        self.fact = Some(fact.into());
        self
    }
}
