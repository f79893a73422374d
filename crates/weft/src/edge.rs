//! Fact edges and the bi-temporal visibility contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relation types edges may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Mentions,
    LinksTo,
    DuplicateOf,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Mentions => "MENTIONS",
            RelationKind::LinksTo => "LINKS_TO",
            RelationKind::DuplicateOf => "DUPLICATE_OF",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse a relation kind from its stored form.
pub fn parse_relation_kind(s: &str) -> Option<RelationKind> {
    match s {
        "MENTIONS" => Some(RelationKind::Mentions),
        "LINKS_TO" => Some(RelationKind::LinksTo),
        "DUPLICATE_OF" => Some(RelationKind::DuplicateOf),
        _ => None,
    }
}

/// The matching tier that produced a duplicate relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Fuzzy,
    Embedding,
    Adjudicated,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::Embedding => "embedding",
            MatchTier::Adjudicated => "adjudicated",
        }
    }
}

/// Parse a matching tier from its stored form.
pub fn parse_match_tier(s: &str) -> Option<MatchTier> {
    match s {
        "exact" => Some(MatchTier::Exact),
        "fuzzy" => Some(MatchTier::Fuzzy),
        "embedding" => Some(MatchTier::Embedding),
        "adjudicated" => Some(MatchTier::Adjudicated),
        _ => None,
    }
}

/// A directed fact edge between two entities.
///
/// Carries transaction time (`created_at`/`expired_at`: when the system
/// recorded and retired the edge) and valid time (`valid_at`/`invalid_at`:
/// when the stated fact was true in the world). At most one edge per
/// (source, relation, target) triple has `expired_at == None` at any
/// instant; a newer generation always expires the prior one rather than
/// mutating it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEdge {
    pub id: String,
    pub scope: String,
    pub source_id: String,
    pub target_id: String,
    pub relation: RelationKind,
    /// Human-readable statement, used for contradiction comparison
    pub fact: String,
    /// Page that asserted this edge; empty for system-derived duplicate edges
    pub page_id: String,
    /// When the system recorded the edge (set once)
    pub created_at: DateTime<Utc>,
    /// Set once when a newer generation supersedes this edge; never unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    /// When the fact became true in the world; defaults to the edit timestamp
    pub valid_at: DateTime<Utc>,
    /// When the fact stopped being true; None means still valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_key: Option<String>,
    /// Match confidence, present on DUPLICATE_OF edges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Matching tier, present on DUPLICATE_OF edges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<MatchTier>,
}

impl FactEdge {
    /// Create a new governing edge; `valid_at` defaults to `now`.
    pub fn new(
        scope: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation: RelationKind,
        fact: impl Into<String>,
        page_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scope: scope.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation,
            fact: fact.into(),
            page_id: page_id.into(),
            created_at: now,
            expired_at: None,
            valid_at: now,
            invalid_at: None,
            embedding_key: None,
            confidence: None,
            tier: None,
        }
    }

    pub fn with_valid_at(mut self, valid_at: DateTime<Utc>) -> Self {
        self.valid_at = valid_at;
        self
    }

    pub fn with_invalid_at(mut self, invalid_at: DateTime<Utc>) -> Self {
        self.invalid_at = Some(invalid_at);
        self
    }

    pub fn with_embedding_key(mut self, key: impl Into<String>) -> Self {
        self.embedding_key = Some(key.into());
        self
    }

    pub fn with_match(mut self, confidence: f32, tier: MatchTier) -> Self {
        self.confidence = Some(confidence);
        self.tier = Some(tier);
        self
    }

    /// Whether this edge is the governing record (not superseded).
    pub fn is_current(&self) -> bool {
        self.expired_at.is_none()
    }

    /// Bi-temporal visibility: true when the edge has not been superseded,
    /// became valid on or before `as_of`, and had not yet become invalid.
    pub fn is_visible_at(&self, as_of: DateTime<Utc>) -> bool {
        self.is_current()
            && self.valid_at <= as_of
            && self.invalid_at.is_none_or(|t| t > as_of)
    }

    /// Visibility for historical reads that include superseded edges the
    /// system had already recorded by `as_of`.
    pub fn was_visible_at(&self, as_of: DateTime<Utc>) -> bool {
        self.created_at <= as_of
            && self.valid_at <= as_of
            && self.invalid_at.is_none_or(|t| t > as_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn edge() -> FactEdge {
        FactEdge::new(
            "ws-1",
            "page-a",
            "robin",
            RelationKind::Mentions,
            "Robin has brown hair.",
            "p1",
            dt("2025-01-01T00:00:00Z"),
        )
    }

    #[test]
    fn test_new_edge_defaults() {
        let e = edge();
        assert_eq!(e.valid_at, e.created_at);
        assert!(e.expired_at.is_none());
        assert!(e.invalid_at.is_none());
        assert!(e.is_current());
    }

    #[test]
    fn test_expired_edge_never_visible() {
        let mut e = edge();
        e.expired_at = Some(dt("2025-01-02T00:00:00Z"));
        assert!(!e.is_visible_at(dt("2025-06-01T00:00:00Z")));
        assert!(!e.is_visible_at(dt("2025-01-01T12:00:00Z")));
    }

    #[test]
    fn test_visibility_window() {
        let e = edge()
            .with_valid_at(dt("2025-01-10T00:00:00Z"))
            .with_invalid_at(dt("2025-02-01T00:00:00Z"));
        // Before the fact became true.
        assert!(!e.is_visible_at(dt("2025-01-05T00:00:00Z")));
        // Inside the window, inclusive of valid_at.
        assert!(e.is_visible_at(dt("2025-01-10T00:00:00Z")));
        assert!(e.is_visible_at(dt("2025-01-20T00:00:00Z")));
        // At and after invalid_at.
        assert!(!e.is_visible_at(dt("2025-02-01T00:00:00Z")));
        assert!(!e.is_visible_at(dt("2025-03-01T00:00:00Z")));
    }

    #[test]
    fn test_open_ended_validity() {
        let e = edge();
        assert!(e.is_visible_at(dt("2030-01-01T00:00:00Z")));
    }

    #[test]
    fn test_historical_visibility_includes_superseded() {
        let mut e = edge().with_invalid_at(dt("2025-03-01T00:00:00Z"));
        e.expired_at = Some(dt("2025-03-01T00:00:00Z"));
        // Superseded now, but it was the record of truth in February.
        assert!(!e.is_visible_at(dt("2025-02-01T00:00:00Z")));
        assert!(e.was_visible_at(dt("2025-02-01T00:00:00Z")));
        // Not yet recorded before creation.
        assert!(!e.was_visible_at(dt("2024-12-01T00:00:00Z")));
    }

    #[test]
    fn test_relation_round_trip() {
        for relation in [
            RelationKind::Mentions,
            RelationKind::LinksTo,
            RelationKind::DuplicateOf,
        ] {
            assert_eq!(parse_relation_kind(relation.as_str()), Some(relation));
        }
        assert_eq!(parse_relation_kind("UNKNOWN"), None);
    }

    #[test]
    fn test_match_tier_round_trip() {
        for tier in [
            MatchTier::Exact,
            MatchTier::Fuzzy,
            MatchTier::Embedding,
            MatchTier::Adjudicated,
        ] {
            assert_eq!(parse_match_tier(tier.as_str()), Some(tier));
        }
        assert_eq!(parse_match_tier("guess"), None);
    }
}
