// Seams to the three external collaborators: extractor, status message, file transport

use async_trait::async_trait;

use super::errors::{ExtractionFailure, StatusError, TransportError};
use super::models::{ExtractedInfo, ExtractionOptions};
use crate::upload::UploadStream;

/// Adapter around an external media extraction capability.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Download `url` according to `options`.
    ///
    /// `Ok(None)` means the backend finished without reporting anything about the media.
    async fn extract(
        &self,
        url: &str,
        options: &ExtractionOptions,
    ) -> Result<Option<ExtractedInfo>, ExtractionFailure>;
}

/// The single status message shown to the requester, edited in place.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update(&self, text: &str) -> Result<(), StatusError>;
}

/// Delivers a finished file to the requester.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Stream `upload` as a document named `filename`.
    ///
    /// The transport must consume the stream through its `AsyncRead` impl so
    /// progress accounting sees every byte.
    async fn send_document(
        &self,
        upload: UploadStream,
        filename: &str,
        caption: &str,
    ) -> Result<(), TransportError>;
}
