//! Text embedders used by the memory subsystem.

use async_trait::async_trait;
use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest as Sha256Digest, Sha256};
use tracing::warn;

use crate::error::ProxyError;

pub const DEFAULT_DIMENSION: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProxyError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProxyError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic, non-semantic embedder: MD5 ∥ SHA-256 of the normalized
/// text, expanded to `dimension` bytes by repetition, mapped to
/// `[-1.0, 1.0)` and L2-normalized. Matches near-identical text only, but
/// needs no model weights and never fails.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashEmbedder { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        HashEmbedder::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProxyError> {
        let normalized = text.to_lowercase();
        let normalized = normalized.trim();

        let mut digest = Md5::digest(normalized.as_bytes()).to_vec();
        digest.extend_from_slice(&Sha256::digest(normalized.as_bytes()));

        let mut raw = vec![0u8; self.dimension];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = digest[i % digest.len()];
        }

        let mut vector: Vec<f32> = raw.iter().map(|&b| (b as f32 / 127.5) - 1.0).collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

/// Always returns zero vectors; used to disable semantic matching entirely
/// while keeping the memory pipeline's shape intact.
pub struct NoopEmbedder {
    dimension: usize,
}

impl NoopEmbedder {
    pub fn new(dimension: usize) -> Self {
        NoopEmbedder { dimension }
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProxyError> {
        Ok(vec![0.0; self.dimension])
    }
}

/// Delegates to an external embedding model returning an already-sized
/// vector. No bundled implementation ships; this is a pluggability seam
/// for deployments that wire in a real model server.
#[async_trait]
pub trait TransformerBackend: Send + Sync {
    async fn embed_remote(&self, text: &str) -> Result<Vec<f32>, ProxyError>;
    fn dimension(&self) -> usize;
}

pub struct TransformerEmbedder<B: TransformerBackend> {
    backend: B,
}

impl<B: TransformerBackend> TransformerEmbedder<B> {
    pub fn new(backend: B) -> Self {
        TransformerEmbedder { backend }
    }
}

#[async_trait]
impl<B: TransformerBackend> Embedder for TransformerEmbedder<B> {
    fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProxyError> {
        self.backend.embed_remote(text).await
    }
}

/// `"hash"` -> `HashEmbedder`, `"noop"` -> `NoopEmbedder`; any other name
/// names a transformer model which this build cannot load, so it falls
/// back to the hash embedder and logs the fact.
pub fn create_embedder(model: &str) -> Box<dyn Embedder> {
    match model {
        "hash" => Box::new(HashEmbedder::default()),
        "noop" => Box::new(NoopEmbedder::new(DEFAULT_DIMENSION)),
        other => {
            warn!(model = other, event = "fallback_to_hash");
            Box::new(HashEmbedder::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_is_case_and_whitespace_insensitive() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Hello World").await.unwrap();
        let b = embedder.embed("  hello world  ").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_differs_for_different_text() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("goodbye").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_output_is_l2_normalized() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("some text to embed").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn hash_embedder_respects_dimension() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("x").await.unwrap();
        assert_eq!(v.len(), 128);
    }

    #[tokio::test]
    async fn noop_embedder_returns_zero_vector() {
        let embedder = NoopEmbedder::new(16);
        let v = embedder.embed("anything").await.unwrap();
        assert_eq!(v, vec![0.0; 16]);
    }

    #[test]
    fn factory_selects_hash_and_noop() {
        let _ = create_embedder("hash");
        let _ = create_embedder("noop");
    }

    #[tokio::test]
    async fn factory_falls_back_to_hash_for_unknown_model() {
        let embedder = create_embedder("some-unavailable-transformer");
        assert_eq!(embedder.dimension(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let embedder = HashEmbedder::default();
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], embedder.embed("a").await.unwrap());
    }
}
