//! In-process embedding index
//!
//! Brute-force cosine search over scope-partitioned entries. The write path
//! is keyed by a stable content hash so re-embedding the same text replaces
//! the prior entry instead of duplicating it.

use sha2::{Digest, Sha256};

use common::{Error, Result};

/// Stable key for an embedded text: SHA-256 over scope and label.
pub fn embedding_key(scope: &str, label: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b"\x00");
    hasher.update(label.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One entry in the index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub key: String,
    pub scope: String,
    /// Subject document the embedded text came from
    pub page_id: String,
    /// The embedded text (entity name or fact)
    pub label: String,
    vector: Vec<f32>,
    norm: f32,
}

/// A nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub key: String,
    pub page_id: String,
    pub label: String,
    pub score: f32,
}

/// Brute-force vector index with cosine similarity.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<VectorEntry>,
    dim: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry with the given key.
    ///
    /// The first insert fixes the index dimensionality; vectors of any other
    /// length are rejected.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        scope: impl Into<String>,
        page_id: impl Into<String>,
        label: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::Other("empty embedding vector".to_string()));
        }
        match self.dim {
            Some(dim) if dim != vector.len() => {
                return Err(Error::Other(format!(
                    "embedding dimension mismatch: index has {}, got {}",
                    dim,
                    vector.len()
                )));
            }
            None => self.dim = Some(vector.len()),
            _ => {}
        }
        let key = key.into();
        let norm = l2_norm(&vector);
        self.entries.retain(|e| e.key != key);
        self.entries.push(VectorEntry {
            key,
            scope: scope.into(),
            page_id: page_id.into(),
            label: label.into(),
            vector,
            norm,
        });
        Ok(())
    }

    /// Remove the entry with the given key; returns whether one existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-`k` entries of `scope` by cosine similarity to `query`,
    /// best first.
    pub fn search(&self, scope: &str, query: &[f32], k: usize) -> Vec<VectorHit> {
        let query_norm = l2_norm(query);
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|e| e.scope == scope)
            .map(|e| VectorHit {
                key: e.key.clone(),
                page_id: e.page_id.clone(),
                label: e.label.clone(),
                score: cosine_similarity(query, &e.vector, query_norm, e.norm),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }
}

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with precomputed norms.
///
/// Returns 0.0 on dimension mismatch or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
    if a.len() != b.len() || a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

/// Cosine similarity computing norms on the fly.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b, l2_norm(a), l2_norm(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_key_stable_and_scoped() {
        let a = embedding_key("ws-1", "Robin");
        let b = embedding_key("ws-1", "Robin");
        let c = embedding_key("ws-2", "Robin");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_insert_and_search_orders_by_similarity() {
        let mut index = VectorIndex::new();
        index
            .insert("k1", "ws-1", "p1", "alpha", vec![1.0, 0.0])
            .unwrap();
        index
            .insert("k2", "ws-1", "p2", "beta", vec![0.8, 0.6])
            .unwrap();
        let hits = index.search("ws-1", &[1.0, 0.0], 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "k1");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_filters_by_scope() {
        let mut index = VectorIndex::new();
        index
            .insert("k1", "ws-1", "p1", "alpha", vec![1.0, 0.0])
            .unwrap();
        index
            .insert("k2", "ws-2", "p2", "beta", vec![1.0, 0.0])
            .unwrap();
        let hits = index.search("ws-2", &[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "k2");
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut index = VectorIndex::new();
        index
            .insert("k1", "ws-1", "p1", "alpha", vec![1.0, 0.0])
            .unwrap();
        index
            .insert("k1", "ws-1", "p1", "alpha v2", vec![0.0, 1.0])
            .unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search("ws-1", &[0.0, 1.0], 1);
        assert_eq!(hits[0].label, "alpha v2");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = VectorIndex::new();
        index
            .insert("k1", "ws-1", "p1", "alpha", vec![1.0, 0.0])
            .unwrap();
        let result = index.insert("k2", "ws-1", "p2", "beta", vec![1.0, 0.0, 0.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_remove() {
        let mut index = VectorIndex::new();
        index
            .insert("k1", "ws-1", "p1", "alpha", vec![1.0])
            .unwrap();
        assert!(index.remove("k1"));
        assert!(!index.remove("k1"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        // Zero vector and mismatched dimensions degrade to 0.0.
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
