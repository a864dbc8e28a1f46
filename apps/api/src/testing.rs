//! In-memory fakes substituted for the external collaborators in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheError, KeyValueStore};
use crate::llm_client::{LanguageModel, LlmError};
use crate::vector_store::{ContextChunk, VectorDocument, VectorIndex, VectorStoreError};
use crate::video::extract::TextRecognizer;
use crate::video::frames::Frame;
use crate::video::VideoError;

// ────────────────────────────────────────────────────────────────────────────
// Language model
// ────────────────────────────────────────────────────────────────────────────

/// Scripted language model: queued responses per method, call counters,
/// and capture of the last generation prompt.
#[derive(Default)]
pub struct FakeLlm {
    generate_responses: Mutex<VecDeque<Result<String, LlmError>>>,
    vision_responses: Mutex<VecDeque<Result<String, LlmError>>>,
    last_generate: Mutex<Option<String>>,
    pub generate_calls: AtomicU32,
    pub vision_calls: AtomicU32,
    pub embed_calls: AtomicU32,
}

impl FakeLlm {
    pub fn queue_generate(&self, response: Result<String, LlmError>) {
        self.generate_responses.lock().unwrap().push_back(response);
    }

    pub fn queue_vision(&self, response: Result<String, LlmError>) {
        self.vision_responses.lock().unwrap().push_back(response);
    }

    pub fn last_generate_prompt(&self) -> Option<String> {
        self.last_generate.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_generate.lock().unwrap() = Some(prompt.to_string());
        self.generate_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::Api {
                    status: 500,
                    message: "no scripted generate response".to_string(),
                })
            })
    }

    async fn generate_vision(&self, _prompt: &str, _frames: &[Frame]) -> Result<String, LlmError> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        self.vision_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::Api {
                    status: 500,
                    message: "no scripted vision response".to_string(),
                })
            })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        // deterministic toy embedding derived from the input
        let len = text.len() as f32;
        Ok(vec![len, len / 2.0, 1.0])
    }

    fn embedding_model(&self) -> &str {
        "models/fake-embedding"
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Key-value store
// ────────────────────────────────────────────────────────────────────────────

/// HashMap-backed store with switchable read/write failures. TTLs are
/// accepted and ignored; tests never wait them out.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn preload(&self, key: &str, value: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("simulated read failure".to_string()));
        }
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vector index
// ────────────────────────────────────────────────────────────────────────────

/// Vec-backed index. Search returns stored documents in insertion order;
/// upsert replaces by id.
#[derive(Default)]
pub struct MemoryIndex {
    pub docs: Mutex<Vec<VectorDocument>>,
    pub search_calls: AtomicU32,
    pub upsert_calls: AtomicU32,
}

impl MemoryIndex {
    pub fn seed(&self, text: &str, source: &str) {
        let doc = VectorDocument::from_text(text.to_string(), source.to_string(), vec![1.0]);
        self.docs.lock().unwrap().push(doc);
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn search(
        &self,
        _embedding: &[f32],
        top_k: i64,
    ) -> Result<Vec<ContextChunk>, VectorStoreError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .take(top_k as usize)
            .map(|doc| ContextChunk {
                text: doc.text.clone(),
                score: Some(0.9),
                source: doc.source.clone(),
            })
            .collect())
    }

    async fn upsert(&self, document: &VectorDocument) -> Result<(), VectorStoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs = self.docs.lock().unwrap();
        if let Some(existing) = docs.iter_mut().find(|d| d.id == document.id) {
            *existing = document.clone();
        } else {
            docs.push(document.clone());
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Text recognizer
// ────────────────────────────────────────────────────────────────────────────

/// Recognizer returning a fixed set of text blocks.
pub struct FakeRecognizer {
    blocks: Vec<String>,
    pub calls: AtomicU32,
}

impl FakeRecognizer {
    pub fn new(blocks: Vec<String>) -> Self {
        Self {
            blocks,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, _frames: &[Frame]) -> Result<Vec<String>, VideoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.blocks.clone())
    }
}
