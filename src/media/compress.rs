// Size-budget re-encoding with ffmpeg

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::probe::DurationProbe;
use crate::downloader::utils::{format_bytes, run_output_with_timeout, tail_lines, ProcessError};

pub const AUDIO_BITRATE_KBPS: u64 = 96;
pub const MIN_VIDEO_BITRATE_KBPS: u64 = 200;
pub const MIN_BUFFER_KBPS: u64 = 400;
/// Share of the ceiling the encoder aims for; the rest absorbs container overhead.
pub const TARGET_PERCENT: u64 = 95;
const COMPRESSION_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

const COMPRESSED_SUFFIX: &str = "compressed.mp4";

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("could not determine the clip duration")]
    DurationUnknown,

    #[error("size ceiling {0} bytes leaves no room for a target")]
    InvalidCeiling(u64),

    #[error("ffmpeg is not installed")]
    TranscoderUnavailable,

    #[error("ffmpeg failed: {0}")]
    EncodeFailed(String),

    #[error("compressed file is {size} bytes, still above {ceiling} bytes")]
    StillTooLarge { size: u64, ceiling: u64 },

    #[error("I/O error during compression: {0}")]
    Io(#[from] io::Error),
}

/// Bitrate settings derived from a clip duration and a byte ceiling.
///
/// All rates are kbit/s. Integer arithmetic throughout, with floors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionPlan {
    pub duration_seconds: f64,
    pub target_bytes: u64,
    pub video_bitrate_kbps: u64,
    pub max_rate_kbps: u64,
    pub buffer_kbps: u64,
    pub audio_bitrate_kbps: u64,
}

impl CompressionPlan {
    pub fn for_budget(duration_seconds: f64, size_ceiling_bytes: u64) -> Result<Self, CompressionError> {
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(CompressionError::DurationUnknown);
        }

        let target_bytes = (u128::from(size_ceiling_bytes) * u128::from(TARGET_PERCENT) / 100) as u64;
        if target_bytes == 0 {
            return Err(CompressionError::InvalidCeiling(size_ceiling_bytes));
        }

        let total_kbps = ((target_bytes as f64 * 8.0) / (duration_seconds * 1000.0)).floor() as u64;
        let video_bitrate_kbps = total_kbps
            .saturating_sub(AUDIO_BITRATE_KBPS)
            .max(MIN_VIDEO_BITRATE_KBPS);

        Ok(Self {
            duration_seconds,
            target_bytes,
            video_bitrate_kbps,
            max_rate_kbps: video_bitrate_kbps * 11 / 10,
            buffer_kbps: (video_bitrate_kbps * 2).max(MIN_BUFFER_KBPS),
            audio_bitrate_kbps: AUDIO_BITRATE_KBPS,
        })
    }
}

/// `<dir>/<stem>.compressed.mp4` next to the input.
pub fn compressed_path_for(input: &Path) -> PathBuf {
    input.with_extension(COMPRESSED_SUFFIX)
}

pub fn transcoder_args(input: &Path, output: &Path, plan: &CompressionPlan) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
    for part in [
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-b:v".to_string(),
        format!("{}k", plan.video_bitrate_kbps),
        "-maxrate".to_string(),
        format!("{}k", plan.max_rate_kbps),
        "-bufsize".to_string(),
        format!("{}k", plan.buffer_kbps),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", plan.audio_bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ] {
        args.push(part.into());
    }
    args.push(output.into());
    args
}

/// Re-encodes a file so that it fits under a byte ceiling.
///
/// The input is never modified or removed; on any failure no output file is left behind.
pub struct SizeBudgetCompressor {
    ffmpeg: PathBuf,
    probe: Arc<dyn DurationProbe>,
    timeout: Duration,
}

impl SizeBudgetCompressor {
    pub fn new(ffmpeg: impl Into<PathBuf>, probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            probe,
            timeout: COMPRESSION_TIMEOUT,
        }
    }

    pub async fn compress_to_fit(
        &self,
        input: &Path,
        size_ceiling_bytes: u64,
    ) -> Result<PathBuf, CompressionError> {
        let duration = self
            .probe
            .probe(input)
            .await
            .ok_or(CompressionError::DurationUnknown)?;
        let plan = CompressionPlan::for_budget(duration, size_ceiling_bytes)?;
        let output = compressed_path_for(input);

        info!(
            input = %input.display(),
            duration_secs = duration,
            video_kbps = plan.video_bitrate_kbps,
            target = %format_bytes(plan.target_bytes),
            "compressing to fit size ceiling"
        );

        match self.encode(input, &output, &plan, size_ceiling_bytes).await {
            Ok(()) => Ok(output),
            Err(e) => {
                discard(&output).await;
                Err(e)
            }
        }
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        plan: &CompressionPlan,
        size_ceiling_bytes: u64,
    ) -> Result<(), CompressionError> {
        let args = transcoder_args(input, output, plan);
        let result = run_output_with_timeout(&self.ffmpeg, &args, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::NotFound { .. } => CompressionError::TranscoderUnavailable,
                other => CompressionError::EncodeFailed(other.to_string()),
            })?;

        if !result.status.success() {
            let detail = tail_lines(&result.stderr, 10);
            warn!(status = %result.status, "ffmpeg exited with failure");
            return Err(CompressionError::EncodeFailed(if detail.is_empty() {
                format!("exit status {}", result.status)
            } else {
                detail
            }));
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CompressionError::EncodeFailed(
                    "ffmpeg reported success but produced no file".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        if size > size_ceiling_bytes {
            warn!(size, ceiling = size_ceiling_bytes, "compressed output still too large");
            return Err(CompressionError::StillTooLarge {
                size,
                ceiling: size_ceiling_bytes,
            });
        }

        debug!(size, output = %output.display(), "compression finished");
        Ok(())
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial compression output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove compression output"),
    }
}
