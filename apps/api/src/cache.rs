//! Key-value cache layer — Redis behind a `KeyValueStore` trait.
//!
//! Three entry kinds share the store under independent key namespaces:
//! `analysis:` (final results, 1 h), `emb:` (embeddings, 30 d) and
//! `video_extract:` (video text pairs, 1 h). Keys are content fingerprints
//! (sha-256), never a process-local hash, so they are stable across runs
//! and processes.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// TTL for a cached final analysis.
pub const ANALYSIS_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for a cached embedding. Embeddings of identical text under a fixed
/// model never change, so this is long.
pub const EMBEDDING_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);
/// TTL for a cached video extraction pair.
pub const VIDEO_EXTRACT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Shared, externally-synchronized key-value store. Each get/set is an
/// independent atomic operation; no lock is ever held across workflow steps.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed store used in production.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }
}

/// Lowercase hex sha-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Result cache key for a (resume, jd) pair.
pub fn analysis_key(resume_text: &str, jd_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resume_text.as_bytes());
    hasher.update(jd_text.as_bytes());
    format!("analysis:{:x}", hasher.finalize())
}

/// Embedding cache key. Includes the model identifier to avoid cross-model
/// collisions.
pub fn embedding_key(model: &str, text: &str) -> String {
    format!("emb:{}:{}", model, sha256_hex(text.as_bytes()))
}

/// Video extraction cache key from a whole-file content hash.
pub fn video_extract_key(video_hash: &str) -> String {
    format!("video_extract:{video_hash}")
}
