// Common data models for the acquisition stage

use std::fmt;
use std::path::PathBuf;

use regex::Regex;
use tempfile::TempDir;

use super::credentials::CredentialHandle;
use super::errors::{AcquisitionError, InvalidRequest};

lazy_static::lazy_static! {
    static ref YOUTUBE_URL_RE: Regex = Regex::new(
        r"(?i)^(https?://)?([a-z0-9-]+\.)*(youtube\.com|youtu\.be)(/|\?|$)"
    ).expect("static regex");
}

/// Whether `url` points at a host the extraction backend is configured for.
pub fn is_supported_url(url: &str) -> bool {
    YOUTUBE_URL_RE.is_match(url.trim())
}

/// One user request: what to fetch and how large the delivered file may be.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    url: String,
    size_ceiling_bytes: u64,
    download_target_bytes: Option<u64>,
    credential: Option<CredentialHandle>,
}

impl AcquisitionRequest {
    pub fn new(url: impl Into<String>, size_ceiling_bytes: u64) -> Result<Self, InvalidRequest> {
        let url = url.into().trim().to_string();
        if !is_supported_url(&url) {
            return Err(InvalidRequest::UnsupportedUrl(url));
        }
        if size_ceiling_bytes == 0 {
            return Err(InvalidRequest::ZeroCeiling);
        }
        Ok(Self {
            url,
            size_ceiling_bytes,
            download_target_bytes: None,
            credential: None,
        })
    }

    /// Smaller size to aim for when picking a format; never above the ceiling.
    pub fn with_download_target(mut self, target_bytes: u64) -> Self {
        self.download_target_bytes = Some(target_bytes.clamp(1, self.size_ceiling_bytes));
        self
    }

    /// Use this credential instead of asking the process-wide provider.
    pub fn with_credential(mut self, credential: CredentialHandle) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn size_ceiling_bytes(&self) -> u64 {
        self.size_ceiling_bytes
    }

    /// Size used in the format filter: the download target if set, else the ceiling.
    pub fn format_target_bytes(&self) -> u64 {
        self.download_target_bytes.unwrap_or(self.size_ceiling_bytes)
    }

    pub fn credential(&self) -> Option<&CredentialHandle> {
        self.credential.as_ref()
    }
}

/// A downloaded file plus the metadata reported for it.
///
/// Whoever holds this owns `path` and its workspace.
#[derive(Debug)]
pub struct AcquiredMedia {
    pub path: PathBuf,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Scratch directory the extractor wrote into. Dropping it removes
    /// `path` together with any partial or sidecar files.
    pub workspace: TempDir,
}

pub type AcquisitionResult = Result<AcquiredMedia, AcquisitionError>;

/// How the extractor should authenticate against anti-bot checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Proof-of-origin tokens fetched from the provider, cookies when present.
    Standard,
    /// Token fetching disabled, token-free player clients only.
    Legacy,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Options handed to an [`ExtractionClient`](super::traits::ExtractionClient) for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOptions {
    /// yt-dlp format selector.
    pub format_expression: String,
    /// Output path template, e.g. `downloads/%(title)s.%(ext)s`.
    pub output_template: String,
    pub cookies_file: Option<PathBuf>,
    pub strategy: ExtractionStrategy,
    /// Base URL of the proof-of-origin token provider.
    pub token_provider_url: Option<String>,
}

/// What the extractor reports after a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    /// Filename the extractor planned to write; a merge step may have changed its extension.
    pub expected_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_youtube_hosts() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/abc123",
            "http://m.youtube.com/shorts/xyz",
            "youtube.com/watch?v=1",
            "HTTPS://MUSIC.YOUTUBE.COM/watch?v=1",
        ] {
            assert!(is_supported_url(url), "{url}");
        }
    }

    #[test]
    fn rejects_other_hosts() {
        for url in [
            "https://google.com",
            "https://notyoutube.com/watch?v=1",
            "https://youtube.com.evil.example/x",
            "",
        ] {
            assert!(!is_supported_url(url), "{url}");
        }
    }

    #[test]
    fn request_validates_inputs() {
        assert_eq!(
            AcquisitionRequest::new("https://google.com", 10).unwrap_err(),
            InvalidRequest::UnsupportedUrl("https://google.com".to_string())
        );
        assert_eq!(
            AcquisitionRequest::new("https://youtu.be/a", 0).unwrap_err(),
            InvalidRequest::ZeroCeiling
        );
        let req = AcquisitionRequest::new("  https://youtu.be/a \n", 10).unwrap();
        assert_eq!(req.url(), "https://youtu.be/a");
        assert!(req.credential().is_none());
    }

    #[test]
    fn download_target_stays_within_ceiling() {
        let req = AcquisitionRequest::new("https://youtu.be/a", 1000).unwrap();
        assert_eq!(req.format_target_bytes(), 1000);
        assert_eq!(req.clone().with_download_target(400).format_target_bytes(), 400);
        assert_eq!(req.with_download_target(5000).format_target_bytes(), 1000);
    }
}
