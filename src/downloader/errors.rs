// Error types for the acquisition and delivery stages

use std::path::PathBuf;

use super::extractors::FailureKind;

/// Raw failure reported by an extraction backend.
///
/// `message` is the backend's own text; it is inspected by
/// [`classify_failure`](super::extractors::classify_failure) and must be kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExtractionFailure {
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal failure of one acquisition attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("extraction failed ({kind}): {message}")]
    ExtractionFailed { kind: FailureKind, message: String },

    #[error("extractor returned no media information")]
    NoInfoReturned,

    #[error("downloaded file not found at {}", expected_path.display())]
    OutputFileMissing { expected_path: PathBuf },
}

impl AcquisitionError {
    pub fn is_anti_bot(&self) -> bool {
        matches!(
            self,
            Self::ExtractionFailed {
                kind: FailureKind::AntiBot,
                ..
            }
        )
    }
}

/// Rejected input to [`AcquisitionRequest::new`](super::models::AcquisitionRequest::new).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("not a supported YouTube link: {0}")]
    UnsupportedUrl(String),

    #[error("size ceiling must be greater than zero")]
    ZeroCeiling,
}

/// Failure of the file delivery call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote side refused the payload because of its size.
    #[error("payload rejected as too large")]
    PayloadTooLarge,

    #[error("transport failure: {0}")]
    Fault(String),
}

/// Failure to edit the in-place status message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// The new text equals the current one; harmless.
    #[error("status message not modified")]
    NotModified,

    #[error("status update failed: {0}")]
    Failed(String),
}
