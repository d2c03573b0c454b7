//! Durable memory backend: a single SQLite table accessed through sqlx.
//!
//! Embeddings are stored as packed little-endian `f32` blobs rather than
//! JSON text, so a cosine scan over a few thousand rows doesn't pay
//! per-row parse cost.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::ProxyError;

use super::{cosine_similarity, top_k_by_similarity, MemoryResult, MemoryStore};
use async_trait::async_trait;

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub async fn connect(path: &str) -> Result<Self, ProxyError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ProxyError::Internal(format!("failed to create memory store directory: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                embedding_blob BLOB NOT NULL,
                metadata_json TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(SqliteMemoryStore { pool })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn add(&self, text: &str, embedding: Vec<f32>, metadata: Option<Value>) -> Result<String, ProxyError> {
        let id = Uuid::new_v4().to_string();
        let embedding_blob = encode_embedding(&embedding);
        let metadata_json = metadata.as_ref().map(|m| m.to_string());
        let timestamp = Utc::now();

        sqlx::query("INSERT INTO memories (id, text, embedding_blob, metadata_json, timestamp) VALUES (?, ?, ?, ?, ?)")
            .bind(&id)
            .bind(text)
            .bind(&embedding_blob)
            .bind(&metadata_json)
            .bind(timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<MemoryResult>, ProxyError> {
        let rows: Vec<(String, String, Vec<u8>, Option<String>, String)> =
            sqlx::query_as("SELECT id, text, embedding_blob, metadata_json, timestamp FROM memories")
                .fetch_all(&self.pool)
                .await?;

        let scored = rows
            .into_iter()
            .map(|(id, text, embedding_blob, metadata_json, timestamp)| {
                let embedding = decode_embedding(&embedding_blob);
                let similarity = cosine_similarity(query_embedding, &embedding);
                let metadata = metadata_json.and_then(|m| serde_json::from_str(&m).ok());
                let timestamp: DateTime<Utc> = timestamp.parse().unwrap_or_else(|_| Utc::now());
                (
                    similarity,
                    MemoryResult {
                        id,
                        text,
                        metadata,
                        timestamp,
                        similarity,
                    },
                )
            })
            .collect();

        Ok(top_k_by_similarity(scored, top_k))
    }

    async fn delete(&self, id: &str) -> Result<bool, ProxyError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), ProxyError> {
        sqlx::query("DELETE FROM memories").execute(&self.pool).await?;
        Ok(())
    }
}
