//! LLM Client — the single point of entry for all Gemini API calls.
//!
//! ARCHITECTURAL RULE: no other module may call the provider directly.
//! Every call site goes through [`envelope::CallEnvelope`], which owns
//! retry, correlation IDs and timing logs; this module performs exactly
//! one network round trip per method invocation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::video::frames::Frame;

pub mod envelope;
pub mod repair;

const HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider safety block: {reason}")]
    SafetyBlocked { reason: String },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl LlmError {
    /// Transient failures are worth retrying: rate limits, timeouts,
    /// transport-level unavailability and 5xx-class responses. Everything
    /// else (bad request, auth failure, safety block) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Text generation, vision generation and embedding, one round trip each.
/// The workflow depends on this trait so tests can substitute a fake.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
    async fn generate_vision(&self, prompt: &str, frames: &[Frame]) -> Result<String, LlmError>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
    /// Model identifier used for embeddings, part of the embedding cache key.
    fn embedding_model(&self) -> &str;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types (Gemini REST API)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    InlineData(InlineData<'a>),
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig<'a> {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    content: Content<'a>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// The single Gemini client used by the whole service.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    vision_model: String,
    embedding_model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        base_url: String,
        chat_model: String,
        vision_model: String,
        embedding_model: String,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url,
            chat_model,
            vision_model,
            embedding_model,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{}:{}?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            method,
            self.api_key
        )
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest<'_>,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(self.endpoint(model, "generateContent"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;

        if let Some(reason) = parsed
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .filter(|r| !r.is_empty())
        {
            return Err(LlmError::SafetyBlocked { reason });
        }

        let candidate = parsed
            .candidates
            .and_then(|mut c| if c.is_empty() { None } else { Some(c.remove(0)) })
            .ok_or(LlmError::EmptyContent)?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(LlmError::SafetyBlocked {
                reason: "candidate finished with SAFETY".to_string(),
            });
        }

        let text: String = candidate
            .content
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }

        debug!(model, chars = text.len(), "generate_content succeeded");
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text(prompt)],
            }],
            generation_config: None,
        };
        self.generate_content(&self.chat_model, &request).await
    }

    async fn generate_vision(&self, prompt: &str, frames: &[Frame]) -> Result<String, LlmError> {
        let mut parts = vec![Part::Text(prompt)];
        for frame in frames {
            parts.push(Part::InlineData(InlineData {
                mime_type: frame.mime_type,
                data: BASE64.encode(&frame.data),
            }));
        }
        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };
        self.generate_content(&self.vision_model, &request).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbedContentRequest {
            content: Content {
                parts: vec![Part::Text(text)],
            },
        };
        let response = self
            .client
            .post(self.endpoint(&self.embedding_model, "embedContent"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbedContentResponse = response.json().await?;
        Ok(parsed.embedding.values)
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        let e = LlmError::Api {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert!(e.is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503] {
            let e = LlmError::Api {
                status,
                message: "unavailable".to_string(),
            };
            assert!(e.is_transient(), "status {status} should be transient");
        }
    }

    #[test]
    fn test_bad_request_is_permanent() {
        let e = LlmError::Api {
            status: 400,
            message: "invalid request".to_string(),
        };
        assert!(!e.is_transient());
    }

    #[test]
    fn test_safety_block_is_permanent() {
        let e = LlmError::SafetyBlocked {
            reason: "SAFETY".to_string(),
        };
        assert!(!e.is_transient());
    }

    #[test]
    fn test_vision_part_serializes_inline_data() {
        let part = Part::InlineData(InlineData {
            mime_type: "image/jpeg",
            data: "AAAA".to_string(),
        });
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(json["inlineData"]["data"], "AAAA");
    }
}
