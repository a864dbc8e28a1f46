//! Video text extraction — vision-model pass with a local OCR fallback.
//!
//! The whole-file content hash gates a short-TTL cache so retried uploads
//! of the same video never redo frame extraction or vision calls. A
//! blocked, empty or malformed vision response degrades to OCR over the
//! same prepared frames; only a video that yields zero frames is fatal.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{sha256_hex, video_extract_key, KeyValueStore, VIDEO_EXTRACT_TTL};
use crate::llm_client::envelope::CallEnvelope;
use crate::llm_client::{repair, LanguageModel};
use crate::prompts::PromptStore;

use super::frames::{dedupe_frames, extract_raw_frames, prepare_frames, Frame};
use super::VideoError;

/// Text pair recovered from a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub resume_text: String,
    pub jd_text: String,
}

/// Local text recognition over prepared frames, used when the vision path
/// fails. Trait-shaped so tests can substitute a fake.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, frames: &[Frame]) -> Result<Vec<String>, VideoError>;
}

/// Tesseract-backed recognizer. Each frame is written to a temp file and
/// run through the `tesseract` binary; decode and recognition happen on
/// the blocking pool.
pub struct TesseractRecognizer;

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, frames: &[Frame]) -> Result<Vec<String>, VideoError> {
        let payloads: Vec<bytes::Bytes> = frames.iter().map(|f| f.data.clone()).collect();
        tokio::task::spawn_blocking(move || {
            let args = rusty_tesseract::Args::default();
            let mut blocks = Vec::with_capacity(payloads.len());
            for data in &payloads {
                let mut file = tempfile::Builder::new()
                    .suffix(".jpg")
                    .tempfile()
                    .map_err(|e| VideoError::Ocr(format!("temp file failed: {e}")))?;
                file.write_all(data)
                    .map_err(|e| VideoError::Ocr(format!("temp file write failed: {e}")))?;
                let path = file.path().to_string_lossy().into_owned();
                let image = rusty_tesseract::Image::from_path(&path)
                    .map_err(|e| VideoError::Ocr(format!("frame load failed: {e:?}")))?;
                let text = rusty_tesseract::image_to_string(&image, &args)
                    .map_err(|e| VideoError::Ocr(format!("tesseract failed: {e:?}")))?;
                blocks.push(text);
            }
            Ok(blocks)
        })
        .await
        .map_err(|e| VideoError::Ocr(format!("ocr task failed: {e}")))?
    }
}

pub struct VideoExtractor {
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn KeyValueStore>,
    prompts: Arc<PromptStore>,
    recognizer: Arc<dyn TextRecognizer>,
    envelope: CallEnvelope,
    frame_interval_ms: i64,
    dedup_threshold: u32,
}

impl VideoExtractor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn KeyValueStore>,
        prompts: Arc<PromptStore>,
        recognizer: Arc<dyn TextRecognizer>,
        envelope: CallEnvelope,
        frame_interval_ms: i64,
        dedup_threshold: u32,
    ) -> Self {
        Self {
            llm,
            store,
            prompts,
            recognizer,
            envelope,
            frame_interval_ms,
            dedup_threshold,
        }
    }

    /// Extracts the resume/JD text pair from a video file. A cache hit on
    /// the whole-file content hash skips frame processing entirely.
    pub async fn extract_text(&self, path: &Path) -> Result<ExtractedText, VideoError> {
        let bytes = tokio::fs::read(path).await?;
        let video_hash = sha256_hex(&bytes);

        if let Some(pair) = self.cached_pair(&video_extract_key(&video_hash)).await {
            return Ok(pair);
        }

        let raw = extract_raw_frames(path, self.frame_interval_ms).await?;
        let threshold = self.dedup_threshold;
        let prepared = tokio::task::spawn_blocking(move || {
            let unique = dedupe_frames(raw, threshold);
            prepare_frames(&unique)
        })
        .await
        .map_err(|e| VideoError::Decode(format!("frame processing task failed: {e}")))??;

        if prepared.is_empty() {
            return Err(VideoError::NoFrames);
        }

        self.extract_with_frames(&video_hash, &prepared).await
    }

    /// Cache probe, vision pass with OCR fallback, cache write. Split from
    /// [`Self::extract_text`] so the cache contract holds for vision- and
    /// OCR-derived pairs alike.
    pub(crate) async fn extract_with_frames(
        &self,
        video_hash: &str,
        frames: &[Frame],
    ) -> Result<ExtractedText, VideoError> {
        let key = video_extract_key(video_hash);
        if let Some(pair) = self.cached_pair(&key).await {
            return Ok(pair);
        }

        let extracted = match self.vision_extraction(frames).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("vision extraction failed, falling back to OCR: {e}");
                self.ocr_fallback(frames).await?
            }
        };

        match serde_json::to_string(&extracted) {
            Ok(serialized) => {
                if let Err(e) = self.store.set(&key, &serialized, VIDEO_EXTRACT_TTL).await {
                    warn!(%key, "video extraction cache write failed: {e}");
                }
            }
            Err(e) => warn!(%key, "video extraction serialization failed: {e}"),
        }

        Ok(extracted)
    }

    async fn cached_pair(&self, key: &str) -> Option<ExtractedText> {
        match self.store.get(key).await {
            Ok(Some(cached)) => match serde_json::from_str::<ExtractedText>(&cached) {
                Ok(pair) => {
                    info!(%key, "video extraction cache hit");
                    Some(pair)
                }
                Err(e) => {
                    warn!(%key, "corrupt video extraction cache entry: {e}");
                    None
                }
            },
            Ok(None) => {
                info!(%key, "video extraction cache miss");
                None
            }
            Err(e) => {
                warn!(%key, "video extraction cache read failed: {e}");
                None
            }
        }
    }

    async fn vision_extraction(&self, frames: &[Frame]) -> Result<ExtractedText, VideoError> {
        let prompt = self
            .prompts
            .get("analyze_video")
            .await
            .map_err(|e| VideoError::InvalidExtraction(e.to_string()))?;

        let raw = self
            .envelope
            .call("video_text_extraction", || {
                self.llm.generate_vision(&prompt, frames)
            })
            .await?;

        let value = repair::parse(&raw);
        validate_extraction(&value).map_err(VideoError::InvalidExtraction)
    }

    async fn ocr_fallback(&self, frames: &[Frame]) -> Result<ExtractedText, VideoError> {
        info!(frames = frames.len(), "running OCR fallback");
        let blocks = self.recognizer.recognize(frames).await?;
        Ok(classify_blocks(&blocks))
    }
}

/// Validates a repaired vision response: both fields present and
/// non-empty, and no provider-reported block marker.
pub(crate) fn validate_extraction(value: &Value) -> Result<ExtractedText, String> {
    if value.get("blocked").and_then(Value::as_bool).unwrap_or(false) {
        return Err("provider reported a safety block".to_string());
    }
    if repair::is_raw_fallback(value) {
        return Err("response was not structured".to_string());
    }

    let resume_text = value
        .get("resume_text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let jd_text = value
        .get("jd_text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();

    if resume_text.is_empty() || jd_text.is_empty() {
        return Err("missing resume_text or jd_text".to_string());
    }

    Ok(ExtractedText {
        resume_text,
        jd_text,
    })
}

/// Splits recognized text blocks into resume-like and JD-like sides by
/// keyword presence.
pub(crate) fn classify_blocks(blocks: &[String]) -> ExtractedText {
    let mut resume = Vec::new();
    let mut jd = Vec::new();

    for block in blocks {
        let lower = block.to_lowercase();
        if lower.contains("experience") || lower.contains("education") {
            resume.push(block.as_str());
        } else {
            jd.push(block.as_str());
        }
    }

    ExtractedText {
        resume_text: resume.join("\n"),
        jd_text: jd.join("\n"),
    }
}
