//! Analysis workflow — a fixed state machine that turns a resume and a
//! job description (text or video) into a structured career-fit analysis.
//!
//! Transitions, entry `RouteInput`, terminal `Done`:
//! RouteInput → ProcessVideo (video input) | CheckCache
//! ProcessVideo → CheckCache
//! CheckCache → Done (hit, pure exit) | SearchVectors
//! SearchVectors → GenerateKnowledge (empty retrieval) | PerformFinalAnalysis
//! GenerateKnowledge → IngestKnowledge → PerformFinalAnalysis → Done
//!
//! Collaborators are injected at construction so the whole graph runs
//! against substitutes in tests. Validation failures become explicit
//! `{"error": ...}` result objects; unexpected failures propagate as
//! [`WorkflowError`].

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{analysis_key, KeyValueStore, ANALYSIS_TTL};
use crate::embeddings::EmbeddingService;
use crate::llm_client::envelope::CallEnvelope;
use crate::llm_client::{repair, LanguageModel, LlmError};
use crate::prompts::{PromptError, PromptStore};
use crate::vector_store::{ContextChunk, VectorDocument, VectorIndex, VectorStoreError, GENERATED_SOURCE};
use crate::video::extract::VideoExtractor;
use crate::video::VideoError;

/// Top-k matches requested from the vector store.
const SEARCH_TOP_K: i64 = 3;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("video extraction failed: {0}")]
    Video(#[from] VideoError),

    #[error("prompt unavailable: {0}")]
    Prompt(#[from] PromptError),
}

/// Inbound request payload: either both texts or a video path.
#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    pub resume_text: Option<String>,
    pub jd_text: Option<String>,
    pub video_path: Option<PathBuf>,
}

impl AnalysisInput {
    pub fn text(resume_text: String, jd_text: String) -> Self {
        Self {
            resume_text: Some(resume_text),
            jd_text: Some(jd_text),
            video_path: None,
        }
    }

    pub fn video(path: PathBuf) -> Self {
        Self {
            video_path: Some(path),
            ..Self::default()
        }
    }
}

/// Per-run mutable state. Created per request, discarded once the final
/// result is returned.
struct WorkflowRun {
    resume_text: Option<String>,
    jd_text: Option<String>,
    video_path: Option<PathBuf>,
    cache_key: Option<String>,
    retrieved_context: Vec<ContextChunk>,
    generated_knowledge: Option<String>,
    final_result: Option<Value>,
}

impl WorkflowRun {
    fn new(input: AnalysisInput) -> Self {
        Self {
            resume_text: input.resume_text,
            jd_text: input.jd_text,
            video_path: input.video_path,
            cache_key: None,
            retrieved_context: Vec::new(),
            generated_knowledge: None,
            final_result: None,
        }
    }
}

/// Workflow steps. The transition table lives in [`AnalysisWorkflow::run`].
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    RouteInput,
    ProcessVideo,
    CheckCache,
    SearchVectors,
    GenerateKnowledge,
    IngestKnowledge,
    PerformFinalAnalysis,
    Done,
}

pub struct AnalysisWorkflow {
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn KeyValueStore>,
    index: Arc<dyn VectorIndex>,
    prompts: Arc<PromptStore>,
    embeddings: EmbeddingService,
    video: VideoExtractor,
    envelope: CallEnvelope,
}

impl AnalysisWorkflow {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn KeyValueStore>,
        index: Arc<dyn VectorIndex>,
        prompts: Arc<PromptStore>,
        embeddings: EmbeddingService,
        video: VideoExtractor,
        envelope: CallEnvelope,
    ) -> Self {
        Self {
            llm,
            store,
            index,
            prompts,
            embeddings,
            video,
            envelope,
        }
    }

    /// Runs one request through the graph and returns the final analysis
    /// value (or an explicit error object).
    pub async fn run(&self, input: AnalysisInput) -> Result<Value, WorkflowError> {
        let mut run = WorkflowRun::new(input);
        let mut step = Step::RouteInput;

        loop {
            step = match step {
                Step::RouteInput => {
                    if run.video_path.is_some() {
                        info!("video input detected");
                        Step::ProcessVideo
                    } else {
                        info!("text input detected");
                        Step::CheckCache
                    }
                }
                Step::ProcessVideo => {
                    self.process_video(&mut run).await?;
                    Step::CheckCache
                }
                Step::CheckCache => {
                    if self.check_cache(&mut run).await {
                        Step::Done
                    } else {
                        Step::SearchVectors
                    }
                }
                Step::SearchVectors => {
                    self.search_vectors(&mut run).await?;
                    if run.retrieved_context.is_empty() {
                        info!("vector store returned nothing, generating knowledge");
                        Step::GenerateKnowledge
                    } else {
                        Step::PerformFinalAnalysis
                    }
                }
                Step::GenerateKnowledge => {
                    self.generate_knowledge(&mut run).await?;
                    Step::IngestKnowledge
                }
                Step::IngestKnowledge => {
                    self.ingest_knowledge(&mut run).await?;
                    Step::PerformFinalAnalysis
                }
                Step::PerformFinalAnalysis => {
                    self.perform_final_analysis(&mut run).await?;
                    Step::Done
                }
                Step::Done => {
                    return Ok(run
                        .final_result
                        .unwrap_or_else(|| json!({"error": "workflow produced no result"})));
                }
            };
        }
    }

    async fn process_video(&self, run: &mut WorkflowRun) -> Result<(), WorkflowError> {
        let Some(path) = run.video_path.clone() else {
            return Err(WorkflowError::MissingInput("video path missing".to_string()));
        };
        info!(path = %path.display(), "processing video input");
        let extracted = self.video.extract_text(&path).await?;

        if extracted.resume_text.trim().is_empty() || extracted.jd_text.trim().is_empty() {
            return Err(WorkflowError::MissingInput(
                "could not extract resume or job description from video".to_string(),
            ));
        }

        run.resume_text = Some(extracted.resume_text);
        run.jd_text = Some(extracted.jd_text);
        Ok(())
    }

    /// Returns true on a cache hit; the hit is a pure exit, no further
    /// steps execute. Cache read failures degrade to a miss.
    async fn check_cache(&self, run: &mut WorkflowRun) -> bool {
        let resume = run.resume_text.as_deref().unwrap_or("");
        let jd = run.jd_text.as_deref().unwrap_or("");
        let key = analysis_key(resume, jd);

        match self.store.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<Value>(&cached) {
                Ok(value) => {
                    info!(%key, "analysis cache hit");
                    run.final_result = Some(value);
                    return true;
                }
                Err(e) => warn!(%key, "corrupt analysis cache entry, recomputing: {e}"),
            },
            Ok(None) => info!(%key, "analysis cache miss"),
            Err(e) => warn!(%key, "analysis cache read failed, recomputing: {e}"),
        }

        run.cache_key = Some(key);
        false
    }

    async fn search_vectors(&self, run: &mut WorkflowRun) -> Result<(), WorkflowError> {
        let jd = run.jd_text.clone().unwrap_or_default();
        let embedding = self.embeddings.embed(&jd).await?;
        let results = self.index.search(&embedding, SEARCH_TOP_K).await?;
        info!(chunks = results.len(), "vector search complete");
        run.retrieved_context = results;
        Ok(())
    }

    async fn generate_knowledge(&self, run: &mut WorkflowRun) -> Result<(), WorkflowError> {
        let jd = run.jd_text.clone().unwrap_or_default();
        let template = self.prompts.get("generate_knowledge").await?;
        let prompt = template.replace("{jd_text}", &jd);

        let passage = self
            .envelope
            .call("generate_knowledge", || self.llm.generate(&prompt))
            .await?;
        run.generated_knowledge = Some(passage);
        Ok(())
    }

    /// Indexes the generated passage and appends it to the run's context so
    /// it is used by the current analysis, not only by later retrievals.
    async fn ingest_knowledge(&self, run: &mut WorkflowRun) -> Result<(), WorkflowError> {
        let Some(passage) = run.generated_knowledge.clone() else {
            return Err(WorkflowError::MissingInput(
                "generated knowledge missing before ingestion".to_string(),
            ));
        };

        let embedding = self.embeddings.embed(&passage).await?;
        let document =
            VectorDocument::from_text(passage.clone(), GENERATED_SOURCE.to_string(), embedding);
        self.index.upsert(&document).await?;
        info!(id = %document.id, "generated knowledge ingested");

        run.retrieved_context.push(ContextChunk {
            text: passage,
            score: None,
            source: GENERATED_SOURCE.to_string(),
        });
        Ok(())
    }

    async fn perform_final_analysis(&self, run: &mut WorkflowRun) -> Result<(), WorkflowError> {
        let resume = run.resume_text.clone().unwrap_or_default();
        let jd = run.jd_text.clone().unwrap_or_default();

        if resume.trim().is_empty() || jd.trim().is_empty() {
            warn!("final analysis missing resume or JD text");
            run.final_result = Some(json!({"error": "Missing resume or JD"}));
            return Ok(());
        }
        if run.retrieved_context.is_empty() {
            warn!("final analysis has no retrieved context");
            run.final_result = Some(json!({"error": "No vector context"}));
            return Ok(());
        }

        let context: String = run
            .retrieved_context
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let template = self.prompts.get("final_analysis").await?;
        let prompt = template
            .replace("{context}", &context)
            .replace("{resume_text}", &resume)
            .replace("{jd_text}", &jd);

        let raw = self
            .envelope
            .call("final_analysis", || self.llm.generate(&prompt))
            .await?;
        let final_result = repair::parse(&raw);

        if let Some(key) = &run.cache_key {
            match serde_json::to_string(&final_result) {
                Ok(serialized) => {
                    if let Err(e) = self.store.set(key, &serialized, ANALYSIS_TTL).await {
                        warn!(%key, "analysis cache write failed: {e}");
                    }
                }
                Err(e) => warn!(%key, "analysis result serialization failed: {e}"),
            }
        } else {
            warn!("missing analysis cache key, skipping cache write");
        }

        run.final_result = Some(final_result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{FakeLlm, FakeRecognizer, MemoryIndex, MemoryStore};
    use crate::video::frames::{DEFAULT_DEDUP_THRESHOLD, DEFAULT_FRAME_INTERVAL_MS};

    struct Harness {
        llm: Arc<FakeLlm>,
        store: Arc<MemoryStore>,
        index: Arc<MemoryIndex>,
        workflow: AnalysisWorkflow,
    }

    fn harness() -> Harness {
        let llm = Arc::new(FakeLlm::default());
        let store = Arc::new(MemoryStore::default());
        let index = Arc::new(MemoryIndex::default());
        let prompts = Arc::new(PromptStore::new(
            store.clone() as Arc<dyn KeyValueStore>,
            PathBuf::from("prompts"),
        ));
        let embeddings = EmbeddingService::new(
            llm.clone(),
            store.clone(),
            prompts.clone(),
            CallEnvelope::default(),
        );
        let video = VideoExtractor::new(
            llm.clone(),
            store.clone(),
            prompts.clone(),
            Arc::new(FakeRecognizer::new(Vec::new())),
            CallEnvelope::default(),
            DEFAULT_FRAME_INTERVAL_MS,
            DEFAULT_DEDUP_THRESHOLD,
        );
        let workflow = AnalysisWorkflow::new(
            llm.clone(),
            store.clone(),
            index.clone(),
            prompts,
            embeddings,
            video,
            CallEnvelope::default(),
        );
        Harness {
            llm,
            store,
            index,
            workflow,
        }
    }

    fn text_input() -> AnalysisInput {
        AnalysisInput::text(
            "Python developer".to_string(),
            "Senior Python role".to_string(),
        )
    }

    #[tokio::test]
    async fn test_empty_store_triggers_generate_then_ingest_then_analyze() {
        let h = harness();
        h.llm
            .queue_generate(Ok("Python roles demand async expertise.".to_string()));
        h.llm.queue_generate(Ok(r#"{"fit_score": 82}"#.to_string()));

        let result = h.workflow.run(text_input()).await.unwrap();

        assert_eq!(result["fit_score"], 82);
        // generated passage was upserted with the generated source tag
        let docs = h.index.docs.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "generated_from_jd");
        assert_eq!(docs[0].text, "Python roles demand async expertise.");
        drop(docs);
        // and was part of the context handed to final analysis
        let prompt = h.llm.last_generate_prompt().unwrap();
        assert!(prompt.contains("Python roles demand async expertise."));
        assert!(prompt.contains("Python developer"));
    }

    #[tokio::test]
    async fn test_second_run_within_ttl_is_pure_cache_exit() {
        let h = harness();
        h.llm
            .queue_generate(Ok("Knowledge passage.".to_string()));
        h.llm.queue_generate(Ok(r#"{"fit_score": 70}"#.to_string()));

        let first = h.workflow.run(text_input()).await.unwrap();

        let generates_after_first = h.llm.generate_calls.load(Ordering::SeqCst);
        let searches_after_first = h.index.search_calls.load(Ordering::SeqCst);
        let embeds_after_first = h.llm.embed_calls.load(Ordering::SeqCst);

        let second = h.workflow.run(text_input()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.llm.generate_calls.load(Ordering::SeqCst), generates_after_first);
        assert_eq!(h.index.search_calls.load(Ordering::SeqCst), searches_after_first);
        assert_eq!(h.llm.embed_calls.load(Ordering::SeqCst), embeds_after_first);
        assert_eq!(h.index.upsert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_empty_retrieval_skips_knowledge_generation() {
        let h = harness();
        h.index.seed("Stored passage about Python careers.", "ingested");
        h.llm.queue_generate(Ok(r#"{"fit_score": 64}"#.to_string()));

        let result = h.workflow.run(text_input()).await.unwrap();

        assert_eq!(result["fit_score"], 64);
        assert_eq!(h.llm.generate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.index.upsert_calls.load(Ordering::SeqCst), 0);
        let prompt = h.llm.last_generate_prompt().unwrap();
        assert!(prompt.contains("Stored passage about Python careers."));
    }

    #[tokio::test]
    async fn test_pre_populated_cache_returns_without_any_calls() {
        let h = harness();
        let key = analysis_key("Python developer", "Senior Python role");
        h.store.preload(&key, r#"{"fit_score": 99}"#);

        let result = h.workflow.run(text_input()).await.unwrap();

        assert_eq!(result["fit_score"], 99);
        assert_eq!(h.llm.generate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.llm.embed_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.index.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_resume_yields_explicit_error_object() {
        let h = harness();
        // jd-only input: knowledge generation still runs off the JD
        h.llm.queue_generate(Ok("Knowledge.".to_string()));
        let input = AnalysisInput {
            resume_text: None,
            jd_text: Some("Senior Python role".to_string()),
            video_path: None,
        };

        let result = h.workflow.run(input).await.unwrap();
        assert_eq!(result, json!({"error": "Missing resume or JD"}));
    }

    #[tokio::test]
    async fn test_generation_failure_is_fatal() {
        let h = harness();
        h.llm.queue_generate(Err(LlmError::Api {
            status: 400,
            message: "invalid request".to_string(),
        }));

        let result = h.workflow.run(text_input()).await;
        assert!(matches!(result, Err(WorkflowError::Llm(_))));
    }

    #[tokio::test]
    async fn test_unparseable_final_output_degrades_to_raw_text() {
        let h = harness();
        h.index.seed("Stored passage.", "ingested");
        h.llm
            .queue_generate(Ok("Sorry, I can only answer in prose.".to_string()));

        let result = h.workflow.run(text_input()).await.unwrap();
        assert_eq!(
            result["raw_text"].as_str().unwrap(),
            "Sorry, I can only answer in prose."
        );
    }

    #[tokio::test]
    async fn test_result_cache_write_failure_still_returns_result() {
        let h = harness();
        h.index.seed("Stored passage.", "ingested");
        h.store.fail_writes.store(true, Ordering::SeqCst);
        h.llm.queue_generate(Ok(r#"{"fit_score": 51}"#.to_string()));

        let result = h.workflow.run(text_input()).await.unwrap();
        assert_eq!(result["fit_score"], 51);
    }
}
