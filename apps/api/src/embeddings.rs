//! Embedding service — content-addressed cache around the embedding call.
//!
//! Cache key is `emb:{model}:{sha256(text)}` so identical text under a
//! fixed model never hits the provider twice within the TTL. Store
//! failures degrade to a direct provider call; they are logged, never
//! fatal.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{embedding_key, KeyValueStore, EMBEDDING_TTL};
use crate::llm_client::envelope::CallEnvelope;
use crate::llm_client::{LanguageModel, LlmError};
use crate::prompts::PromptStore;

pub struct EmbeddingService {
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn KeyValueStore>,
    prompts: Arc<PromptStore>,
    envelope: CallEnvelope,
}

impl EmbeddingService {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn KeyValueStore>,
        prompts: Arc<PromptStore>,
        envelope: CallEnvelope,
    ) -> Self {
        Self {
            llm,
            store,
            prompts,
            envelope,
        }
    }

    /// Embeds `text`, consulting the cache first. Empty or whitespace-only
    /// input returns an empty vector without any network call.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let key = embedding_key(self.llm.embedding_model(), text);

        match self.store.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<f32>>(&cached) {
                Ok(vector) => {
                    debug!(%key, "embedding cache hit");
                    return Ok(vector);
                }
                Err(e) => warn!(%key, "corrupt embedding cache entry, recomputing: {e}"),
            },
            Ok(None) => debug!(%key, "embedding cache miss"),
            Err(e) => warn!(%key, "embedding cache read failed, calling provider: {e}"),
        }

        let prompt = match self.prompts.get("rag_embedding").await {
            Ok(template) => template.replace("{query}", text),
            Err(e) => {
                warn!("embedding prompt unavailable, embedding raw text: {e}");
                text.to_string()
            }
        };

        let vector = self
            .envelope
            .call("embed_content", || self.llm.embed(&prompt))
            .await?;

        match serde_json::to_string(&vector) {
            Ok(serialized) => {
                if let Err(e) = self.store.set(&key, &serialized, EMBEDDING_TTL).await {
                    warn!(%key, "embedding cache write failed: {e}");
                }
            }
            Err(e) => warn!(%key, "embedding serialization failed, skipping cache: {e}"),
        }

        Ok(vector)
    }
}
