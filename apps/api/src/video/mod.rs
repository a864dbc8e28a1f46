//! Video text extraction — frame sampling, perceptual dedup, vision-model
//! extraction and the local OCR fallback.

use thiserror::Error;

use crate::llm_client::LlmError;

pub mod extract;
pub mod frames;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("failed to read video file: {0}")]
    Io(#[from] std::io::Error),

    #[error("video decode failed: {0}")]
    Decode(String),

    #[error("frame encode failed: {0}")]
    Encode(String),

    #[error("no frames could be extracted from video")]
    NoFrames,

    #[error("vision extraction invalid: {0}")]
    InvalidExtraction(String),

    #[error("ocr failed: {0}")]
    Ocr(String),

    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
}
