//! Vector memory storage.
//!
//! The durable backend is a single SQLite table; no native ANN extension
//! is assumed available in this environment, so search always falls back
//! to an in-process cosine scan (see `cosine_similarity`).

mod retriever;
mod sqlite_store;

pub use retriever::MemoryRetriever;
pub use sqlite_store::SqliteMemoryStore;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProxyError;

#[derive(Debug, Clone, Serialize)]
pub struct MemoryResult {
    pub id: String,
    pub text: String,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
    /// Higher is closer; always populated by every backend in this build
    /// (no backend here reports `distance` instead).
    pub similarity: f32,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, text: &str, embedding: Vec<f32>, metadata: Option<Value>) -> Result<String, ProxyError>;
    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<MemoryResult>, ProxyError>;
    async fn delete(&self, id: &str) -> Result<bool, ProxyError>;
    async fn clear(&self) -> Result<(), ProxyError>;
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

fn top_k_by_similarity(mut scored: Vec<(f32, MemoryResult)>, top_k: usize) -> Vec<MemoryResult> {
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(top_k).map(|(_, r)| r).collect()
}

struct Entry {
    text: String,
    embedding: Vec<f32>,
    metadata: Option<Value>,
    timestamp: DateTime<Utc>,
}

/// Non-persistent store for tests and ephemeral deployments.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(&self, text: &str, embedding: Vec<f32>, metadata: Option<Value>) -> Result<String, ProxyError> {
        let id = Uuid::new_v4().to_string();
        self.entries.write().unwrap().insert(
            id.clone(),
            Entry {
                text: text.to_string(),
                embedding,
                metadata,
                timestamp: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<MemoryResult>, ProxyError> {
        let entries = self.entries.read().unwrap();
        let scored = entries
            .iter()
            .map(|(id, entry)| {
                let similarity = cosine_similarity(query_embedding, &entry.embedding);
                (
                    similarity,
                    MemoryResult {
                        id: id.clone(),
                        text: entry.text.clone(),
                        metadata: entry.metadata.clone(),
                        timestamp: entry.timestamp,
                        similarity,
                    },
                )
            })
            .collect();
        Ok(top_k_by_similarity(scored, top_k))
    }

    async fn delete(&self, id: &str) -> Result<bool, ProxyError> {
        Ok(self.entries.write().unwrap().remove(id).is_some())
    }

    async fn clear(&self) -> Result<(), ProxyError> {
        self.entries.write().unwrap().clear();
        Ok(())
    }
}

/// Disables memory entirely while keeping the pipeline's shape intact.
pub struct NoopStore;

#[async_trait]
impl MemoryStore for NoopStore {
    async fn add(&self, _text: &str, _embedding: Vec<f32>, _metadata: Option<Value>) -> Result<String, ProxyError> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn search(&self, _query_embedding: &[f32], _top_k: usize) -> Result<Vec<MemoryResult>, ProxyError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: &str) -> Result<bool, ProxyError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<(), ProxyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn in_memory_store_add_search_delete_clear() {
        let store = InMemoryStore::new();
        let id = store.add("remember this", vec![1.0, 0.0], None).await.unwrap();
        let results = store.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);

        assert!(store.delete(&id).await.unwrap());
        assert!(store.search(&[1.0, 0.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_store_search_orders_by_similarity_descending() {
        let store = InMemoryStore::new();
        store.add("far", vec![0.0, 1.0], None).await.unwrap();
        store.add("close", vec![1.0, 0.0], None).await.unwrap();
        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].text, "close");
        assert_eq!(results[1].text, "far");
    }

    #[tokio::test]
    async fn in_memory_store_respects_top_k() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.add(&format!("mem{i}"), vec![1.0, i as f32], None).await.unwrap();
        }
        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn noop_store_never_returns_results() {
        let store = NoopStore;
        store.add("ignored", vec![1.0], None).await.unwrap();
        assert!(store.search(&[1.0], 3).await.unwrap().is_empty());
        assert!(!store.delete("anything").await.unwrap());
    }
}
