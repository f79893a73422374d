//! Contradiction resolution audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fact invalidated during one contradiction resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidatedFact {
    pub edge_id: String,
    pub fact: String,
}

/// Append-only record of one contradiction resolution batch.
///
/// Created once per resolution, never mutated. Consumed by a notification
/// surface outside this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionRecord {
    pub id: String,
    pub scope: String,
    /// Page whose edit triggered the resolution
    pub page_id: String,
    /// The new fact that superseded the invalidated ones
    pub new_fact: String,
    pub invalidated: Vec<InvalidatedFact>,
    /// Rationale for the resolution
    pub rationale: String,
    /// Resolution strategy applied
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

fn default_strategy() -> String {
    "invalidate_old".to_string()
}

fn default_confidence() -> f32 {
    0.85
}

impl ContradictionRecord {
    pub fn new(
        scope: impl Into<String>,
        page_id: impl Into<String>,
        new_fact: impl Into<String>,
        rationale: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scope: scope.into(),
            page_id: page_id.into(),
            new_fact: new_fact.into(),
            invalidated: Vec::new(),
            rationale: rationale.into(),
            strategy: default_strategy(),
            confidence: default_confidence(),
            created_at: now,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn push_invalidated(&mut self, edge_id: impl Into<String>, fact: impl Into<String>) {
        self.invalidated.push(InvalidatedFact {
            edge_id: edge_id.into(),
            fact: fact.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults() {
        let now = Utc::now();
        let record = ContradictionRecord::new(
            "ws-1",
            "p1",
            "Robin has green hair.",
            "Hair color changed.",
            now,
        );
        assert_eq!(record.strategy, "invalidate_old");
        assert_eq!(record.confidence, 0.85);
        assert!(record.invalidated.is_empty());
        assert_eq!(record.created_at, now);
    }

    #[test]
    fn test_push_invalidated() {
        let mut record = ContradictionRecord::new("ws-1", "p1", "new", "why", Utc::now());
        record.push_invalidated("edge-1", "Robin has brown hair.");
        assert_eq!(record.invalidated.len(), 1);
        assert_eq!(record.invalidated[0].edge_id, "edge-1");
    }

    #[test]
    fn test_serde_fills_defaults() {
        let json = r#"{
            "id": "a", "scope": "ws-1", "page_id": "p1",
            "new_fact": "n", "invalidated": [], "rationale": "r",
            "created_at": "2025-01-01T00:00:00Z"
        }"#;
        let record: ContradictionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.strategy, "invalidate_old");
        assert_eq!(record.confidence, 0.85);
    }
}
