//! Analysis endpoints — the inbound boundary of the workflow.
//!
//! Text requests carry both documents inline; video requests upload a file
//! that is spooled to a temp path for the run's lifetime.

use axum::extract::{Multipart, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::errors::AppError;
use crate::state::AppState;
use crate::workflow::AnalysisInput;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub resume_text: String,
    pub jd_text: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis: Value,
    pub analyzed_at: DateTime<Utc>,
}

pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    if request.resume_text.trim().is_empty() || request.jd_text.trim().is_empty() {
        return Err(AppError::Validation(
            "resume_text and jd_text are required".to_string(),
        ));
    }

    let analysis = state
        .workflow
        .run(AnalysisInput::text(request.resume_text, request.jd_text))
        .await?;

    Ok(Json(AnalyzeResponse {
        analysis,
        analyzed_at: Utc::now(),
    }))
}

pub async fn handle_analyze_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let mut video_file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart payload: {e}")))?
    {
        if field.name() != Some("video") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("failed to read upload: {e}")))?;
        if data.is_empty() {
            return Err(AppError::Validation("uploaded video is empty".to_string()));
        }

        let temp = tempfile::Builder::new()
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("temp file failed: {e}")))?;
        let mut file = tokio::fs::File::create(temp.path())
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("temp file open failed: {e}")))?;
        file.write_all(&data)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("temp file write failed: {e}")))?;
        file.flush()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("temp file flush failed: {e}")))?;

        info!(bytes = data.len(), "video upload spooled");
        video_file = Some(temp);
        break;
    }

    let Some(video_file) = video_file else {
        return Err(AppError::Validation(
            "multipart field 'video' is required".to_string(),
        ));
    };

    let analysis = state
        .workflow
        .run(AnalysisInput::video(video_file.path().to_path_buf()))
        .await?;

    Ok(Json(AnalyzeResponse {
        analysis,
        analyzed_at: Utc::now(),
    }))
}
