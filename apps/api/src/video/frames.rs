//! Frame extraction pipeline: sample by presentation time, collapse
//! visually static runs with a perceptual hash, and encode survivors for
//! the vision model.
//!
//! Decoding goes through an `ffmpeg` subprocess that dumps every decoded
//! frame plus `showinfo` timestamps; selection happens here against the
//! last *kept* frame's presentation time, which keeps sampling correct
//! under variable frame rates.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};
use tracing::{debug, info};

use super::VideoError;

/// One kept frame every this much presentation time.
pub const DEFAULT_FRAME_INTERVAL_MS: i64 = 300;
/// Hamming-distance threshold below which consecutive frames are
/// considered visually identical.
pub const DEFAULT_DEDUP_THRESHOLD: u32 = 5;

/// A decoded frame with its presentation timestamp.
pub struct RawFrame {
    pub image: DynamicImage,
    pub timestamp_ms: i64,
}

/// A compressed frame ready for transmission to the vision model.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub mime_type: &'static str,
    pub timestamp_ms: i64,
}

/// Decodes the video and keeps one frame every `interval_ms` of
/// presentation time. Fails with [`VideoError::NoFrames`] when the video
/// yields nothing.
pub async fn extract_raw_frames(path: &Path, interval_ms: i64) -> Result<Vec<RawFrame>, VideoError> {
    let dir = tempfile::tempdir()?;
    let pattern = dir.path().join("frame_%06d.png");

    let output = tokio::process::Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-i")
        .arg(path)
        .arg("-vf")
        .arg("showinfo")
        .arg("-vsync")
        .arg("0")
        .arg(&pattern)
        .output()
        .await
        .map_err(|e| VideoError::Decode(format!("failed to launch ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
        return Err(VideoError::Decode(format!("ffmpeg exited with error: {tail}")));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let timestamps = parse_pts_times(&stderr);
    if timestamps.is_empty() {
        return Err(VideoError::NoFrames);
    }

    let keep = select_by_interval(&timestamps, interval_ms);
    debug!(
        decoded = timestamps.len(),
        kept = keep.len(),
        interval_ms,
        "frame sampling complete"
    );

    let dir_path = dir.path().to_path_buf();
    let frames = tokio::task::spawn_blocking(move || -> Result<Vec<RawFrame>, VideoError> {
        // tempdir moved in so the dumped frames outlive the async caller
        let _dir = dir;
        let mut frames = Vec::with_capacity(keep.len());
        for &index in &keep {
            // image2 numbers output files from 1
            let file = dir_path.join(format!("frame_{:06}.png", index + 1));
            let image = image::open(&file)
                .map_err(|e| VideoError::Decode(format!("failed to load frame {index}: {e}")))?;
            frames.push(RawFrame {
                image,
                timestamp_ms: timestamps[index],
            });
        }
        Ok(frames)
    })
    .await
    .map_err(|e| VideoError::Decode(format!("frame load task failed: {e}")))??;

    if frames.is_empty() {
        return Err(VideoError::NoFrames);
    }
    info!(frames = frames.len(), "extracted raw frames");
    Ok(frames)
}

/// Parses `pts_time:` values (seconds) from ffmpeg `showinfo` output into
/// millisecond timestamps, in decode order.
pub(crate) fn parse_pts_times(stderr: &str) -> Vec<i64> {
    let mut times = Vec::new();
    for line in stderr.lines() {
        let Some(pos) = line.find("pts_time:") else {
            continue;
        };
        let rest = &line[pos + "pts_time:".len()..];
        let token: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if let Ok(seconds) = token.parse::<f64>() {
            times.push((seconds * 1000.0).round() as i64);
        }
    }
    times
}

/// Indices of frames to keep: one per `interval_ms` of presentation time,
/// measured against the last kept frame.
pub(crate) fn select_by_interval(timestamps_ms: &[i64], interval_ms: i64) -> Vec<usize> {
    let mut keep = Vec::new();
    let mut last = -interval_ms;
    for (index, &t) in timestamps_ms.iter().enumerate() {
        if t - last >= interval_ms {
            keep.push(index);
            last = t;
        }
    }
    keep
}

/// Collapses visually static runs: a frame survives only when its
/// perceptual hash differs from the previously kept frame's hash by more
/// than `threshold` bits. CPU-bound; run under `spawn_blocking`.
pub fn dedupe_frames(frames: Vec<RawFrame>, threshold: u32) -> Vec<RawFrame> {
    let hasher = HasherConfig::new().hash_alg(HashAlg::Gradient).to_hasher();
    let mut unique = Vec::new();
    let mut last_hash: Option<ImageHash> = None;

    for frame in frames {
        let hash = hasher.hash_image(&frame.image);
        let distinct = last_hash
            .as_ref()
            .map_or(true, |prev| hash.dist(prev) > threshold);
        if distinct {
            unique.push(frame);
            last_hash = Some(hash);
        }
    }
    unique
}

/// JPEG-encodes kept frames with an explicit MIME type. CPU-bound; run
/// under `spawn_blocking`.
pub fn prepare_frames(frames: &[RawFrame]) -> Result<Vec<Frame>, VideoError> {
    let mut prepared = Vec::with_capacity(frames.len());
    for frame in frames {
        let mut buffer = Cursor::new(Vec::new());
        frame
            .image
            .write_to(&mut buffer, image::ImageOutputFormat::Jpeg(85))
            .map_err(|e| VideoError::Encode(e.to_string()))?;
        prepared.push(Frame {
            data: Bytes::from(buffer.into_inner()),
            mime_type: "image/jpeg",
            timestamp_ms: frame.timestamp_ms,
        });
    }
    Ok(prepared)
}
