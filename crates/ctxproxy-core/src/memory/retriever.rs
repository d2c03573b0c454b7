//! Composes an embedder with a store: text in, ranked memory results out.

use serde_json::Value;
use tracing::info;

use crate::embed::Embedder;
use crate::error::ProxyError;

use super::{MemoryResult, MemoryStore};

const DEFAULT_TEMPLATE: &str = "Relevant context from memory: {text}";

pub struct MemoryRetriever {
    embedder: Box<dyn Embedder>,
    store: Box<dyn MemoryStore>,
    similarity_threshold: f32,
}

impl MemoryRetriever {
    pub fn new(embedder: Box<dyn Embedder>, store: Box<dyn MemoryStore>) -> Self {
        MemoryRetriever {
            embedder,
            store,
            similarity_threshold: 0.5,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Embed `text` and persist it, returning the new entry's id.
    pub async fn add_memory(&self, text: &str, metadata: Option<Value>) -> Result<String, ProxyError> {
        let embedding = self.embedder.embed(text).await?;
        let id = self.store.add(text, embedding, metadata).await?;
        info!(id = %id, "memory.added");
        Ok(id)
    }

    /// Embed `query`, search the store, and keep only results at or above
    /// the similarity threshold.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<MemoryResult>, ProxyError> {
        let embedding = self.embedder.embed(query).await?;
        let results = self.store.search(&embedding, top_k).await?;
        let filtered: Vec<MemoryResult> = results
            .into_iter()
            .filter(|r| r.similarity >= self.similarity_threshold)
            .collect();
        info!(query_len = query.len(), kept = filtered.len(), "memory.retrieved");
        Ok(filtered)
    }

    /// Retrieve and join matching texts into a single context block, using
    /// `template`'s `{text}` placeholder. Empty string if nothing matched.
    pub async fn retrieve_for_context(&self, query: &str, top_k: usize, template: Option<&str>) -> Result<String, ProxyError> {
        let results = self.retrieve(query, top_k).await?;
        if results.is_empty() {
            return Ok(String::new());
        }
        let joined = results.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join("\n");
        let template = template.unwrap_or(DEFAULT_TEMPLATE);
        Ok(template.replace("{text}", &joined))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ProxyError> {
        self.store.delete(id).await
    }

    pub async fn clear(&self) -> Result<(), ProxyError> {
        self.store.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::memory::InMemoryStore;

    fn retriever() -> MemoryRetriever {
        MemoryRetriever::new(Box::new(HashEmbedder::default()), Box::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn add_then_retrieve_round_trips() {
        let r = retriever();
        let id = r.add_memory("the user's favorite color is blue", None).await.unwrap();
        let results = r.retrieve("the user's favorite color is blue", 3).await.unwrap();
        assert!(results.iter().any(|res| res.id == id));
    }

    #[tokio::test]
    async fn dissimilar_query_is_filtered_by_threshold() {
        let r = retriever().with_similarity_threshold(0.99);
        r.add_memory("completely unrelated text about gardening", None).await.unwrap();
        let results = r.retrieve("a totally different query about rockets", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn retrieve_for_context_empty_when_no_matches() {
        let r = retriever().with_similarity_threshold(0.99);
        let ctx = r.retrieve_for_context("nothing stored yet", 3, None).await.unwrap();
        assert_eq!(ctx, "");
    }

    #[tokio::test]
    async fn retrieve_for_context_uses_template() {
        let r = retriever();
        r.add_memory("remember the deployment window is friday", None).await.unwrap();
        let ctx = r
            .retrieve_for_context("remember the deployment window is friday", 3, Some("CTX: {text}"))
            .await
            .unwrap();
        assert!(ctx.starts_with("CTX: "));
        assert!(ctx.contains("deployment window"));
    }
}
