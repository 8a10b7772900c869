// Clip duration lookup via ffprobe

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::downloader::utils::run_output_with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Reports the playable duration of a media file in seconds.
///
/// `None` is a normal answer (tool missing, unreadable file, no duration), not a fault.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Option<f64>;
}

pub struct FfprobeDuration {
    binary: PathBuf,
    timeout: Duration,
}

impl FfprobeDuration {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    fn parse_duration(stdout: &[u8]) -> Option<f64> {
        let value: f64 = String::from_utf8_lossy(stdout).trim().parse().ok()?;
        (value.is_finite() && value > 0.0).then_some(value)
    }
}

#[async_trait]
impl DurationProbe for FfprobeDuration {
    async fn probe(&self, path: &Path) -> Option<f64> {
        let args: [&OsStr; 7] = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-show_entries"),
            OsStr::new("format=duration"),
            OsStr::new("-of"),
            OsStr::new("default=nokey=1:noprint_wrappers=1"),
            path.as_os_str(),
        ];

        let output = match run_output_with_timeout(&self.binary, &args, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "ffprobe unavailable");
                return None;
            }
        };

        if !output.status.success() {
            debug!(status = %output.status, path = %path.display(), "ffprobe failed");
            return None;
        }

        Self::parse_duration(&output.stdout)
    }
}
