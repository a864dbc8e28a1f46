//! Prompt store — async lookup of prompt templates by name.
//!
//! Resolution order: Redis override (`prompt:{name}`), then a file under
//! the configured prompt directory (`{name}.txt`), then the compiled-in
//! default. Templates are opaque parameterized strings; callers fill the
//! `{placeholder}` slots before sending.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::KeyValueStore;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unknown prompt: {0}")]
    Unknown(String),
}

pub struct PromptStore {
    store: Arc<dyn KeyValueStore>,
    base_path: PathBuf,
}

impl PromptStore {
    pub fn new(store: Arc<dyn KeyValueStore>, base_path: PathBuf) -> Self {
        Self { store, base_path }
    }

    pub async fn get(&self, name: &str) -> Result<String, PromptError> {
        match self.store.get(&format!("prompt:{name}")).await {
            Ok(Some(template)) => {
                debug!(name, "prompt loaded from cache override");
                return Ok(template);
            }
            Ok(None) => {}
            Err(e) => warn!(name, "prompt cache read failed: {e}"),
        }

        let path = self.base_path.join(format!("{name}.txt"));
        match tokio::fs::read_to_string(&path).await {
            Ok(template) => {
                debug!(name, path = %path.display(), "prompt loaded from file");
                return Ok(template);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(name, path = %path.display(), "prompt file read failed: {e}"),
        }

        default_template(name)
            .map(str::to_string)
            .ok_or_else(|| PromptError::Unknown(name.to_string()))
    }
}

fn default_template(name: &str) -> Option<&'static str> {
    match name {
        "generate_knowledge" => Some(GENERATE_KNOWLEDGE),
        "final_analysis" => Some(FINAL_ANALYSIS),
        "analyze_video" => Some(ANALYZE_VIDEO),
        "rag_embedding" => Some(RAG_EMBEDDING),
        _ => None,
    }
}

/// Synthesizes a foundational knowledge passage from a JD when retrieval
/// comes back empty. Replace `{jd_text}`.
const GENERATE_KNOWLEDGE: &str = r#"You are a career research analyst. Write a focused knowledge passage about the role described in the job description below: the skills it demands, how those skills are typically demonstrated, common career paths into the role, and what distinguishes strong candidates.

Write plain prose, no lists, 150-250 words.

JOB DESCRIPTION:
{jd_text}"#;

/// Final career-fit analysis. Replace `{context}`, `{resume_text}`, `{jd_text}`.
const FINAL_ANALYSIS: &str = r#"You are an expert career coach. Using the background knowledge below, analyze how well the candidate's resume fits the job description.

You MUST respond with valid JSON only. Do NOT use markdown code fences. Return a JSON object with this EXACT schema:
{
  "fit_score": 0,
  "summary": "two-sentence overall assessment",
  "strengths": ["..."],
  "gaps": ["..."],
  "recommendations": ["..."]
}

fit_score is an integer 0-100.

BACKGROUND KNOWLEDGE:
{context}

RESUME:
{resume_text}

JOB DESCRIPTION:
{jd_text}"#;

/// Vision extraction prompt sent with the prepared video frames.
const ANALYZE_VIDEO: &str = r#"The attached images are frames sampled from a screen recording that shows a resume and a job description. Read the visible text carefully across all frames.

Return a JSON object with this EXACT schema and nothing else:
{
  "resume_text": "all resume text, reconstructed in reading order",
  "jd_text": "all job description text, reconstructed in reading order"
}

If one of the documents is not visible in any frame, return an empty string for its field."#;

/// Embedding prompt wrapper. Replace `{query}`.
const RAG_EMBEDDING: &str = "Embed this text:\n{query}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_exist_for_every_workflow_prompt() {
        for name in [
            "generate_knowledge",
            "final_analysis",
            "analyze_video",
            "rag_embedding",
        ] {
            assert!(default_template(name).is_some(), "missing default for {name}");
        }
    }

    #[test]
    fn test_unknown_prompt_has_no_default() {
        assert!(default_template("mock_interview").is_none());
    }

    #[test]
    fn test_templates_carry_expected_placeholders() {
        assert!(GENERATE_KNOWLEDGE.contains("{jd_text}"));
        assert!(FINAL_ANALYSIS.contains("{context}"));
        assert!(FINAL_ANALYSIS.contains("{resume_text}"));
        assert!(FINAL_ANALYSIS.contains("{jd_text}"));
        assert!(RAG_EMBEDDING.contains("{query}"));
    }
}
