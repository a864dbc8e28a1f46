//! Vector store gateway — similarity search and idempotent upsert against
//! a pgvector-backed Postgres table.
//!
//! Search results come back in descending similarity order as reported by
//! the index; ties are broken by the index's native order, which is not
//! deterministic for equal scores. Document identity is a content
//! fingerprint, so re-upserting identical content replaces the prior row
//! rather than duplicating it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::cache::sha256_hex;

/// Embedding dimensionality of the configured embedding model.
const EMBEDDING_DIMS: usize = 768;

/// Source tag for knowledge synthesized from a JD during a run.
pub const GENERATED_SOURCE: &str = "generated_from_jd";

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A retrieved or generated passage supplied to the model as grounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub source: String,
}

/// A document to be indexed. `id` is derived from the text content so the
/// same passage always maps to the same row.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub id: String,
    pub text: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

impl VectorDocument {
    pub fn from_text(text: String, source: String, embedding: Vec<f32>) -> Self {
        let id = sha256_hex(text.as_bytes());
        Self {
            id,
            text,
            source,
            embedding,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k nearest chunks by descending similarity.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: i64,
    ) -> Result<Vec<ContextChunk>, VectorStoreError>;

    /// Insert or replace a document by identity.
    async fn upsert(&self, document: &VectorDocument) -> Result<(), VectorStoreError>;
}

pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the vector extension, table and index if missing.
    pub async fn ensure_schema(&self) -> Result<(), VectorStoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS career_knowledge (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                embedding vector({EMBEDDING_DIMS}) NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS career_knowledge_embedding_idx
             ON career_knowledge USING hnsw (embedding vector_cosine_ops)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PgVectorStore {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: i64,
    ) -> Result<Vec<ContextChunk>, VectorStoreError> {
        let rows = sqlx::query(
            "SELECT text, source, 1 - (embedding <=> $1::vector) AS score
             FROM career_knowledge
             ORDER BY embedding <=> $1::vector
             LIMIT $2",
        )
        .bind(vector_literal(embedding))
        .bind(top_k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ContextChunk {
                text: row.get("text"),
                source: row.get("source"),
                score: row.try_get::<f64, _>("score").ok().map(|s| s as f32),
            })
            .collect())
    }

    async fn upsert(&self, document: &VectorDocument) -> Result<(), VectorStoreError> {
        sqlx::query(
            "INSERT INTO career_knowledge (id, text, source, embedding)
             VALUES ($1, $2, $3, $4::vector)
             ON CONFLICT (id) DO UPDATE
             SET text = EXCLUDED.text,
                 source = EXCLUDED.source,
                 embedding = EXCLUDED.embedding",
        )
        .bind(&document.id)
        .bind(&document.text)
        .bind(&document.source)
        .bind(vector_literal(&document.embedding))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// pgvector input literal: `[v1,v2,...]`.
fn vector_literal(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_document_identity_is_content_derived() {
        let a = VectorDocument::from_text("same passage".into(), "generated_from_jd".into(), vec![]);
        let b = VectorDocument::from_text("same passage".into(), "generated_from_jd".into(), vec![]);
        assert_eq!(a.id, b.id);

        let c = VectorDocument::from_text("other passage".into(), "generated_from_jd".into(), vec![]);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_context_chunk_omits_missing_score() {
        let chunk = ContextChunk {
            text: "passage".into(),
            score: None,
            source: GENERATED_SOURCE.into(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json.get("score").is_none());
        assert_eq!(json["source"], "generated_from_jd");
    }
}
