// Request pipeline: acquire, fit to the size ceiling, upload, clean up
//
// Stages run strictly in order. Every file the pipeline takes ownership of is
// held by a `ManagedFile`, and the request's scratch directory is closed last,
// so nothing is left on disk by the time `handle` returns.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::downloader::utils::truncate_text;
use crate::downloader::{
    AcquiredMedia, AcquisitionController, AcquisitionError, AcquisitionRequest, DeliveryTransport,
    FailureKind, StatusSink, TransportError,
};
use crate::media::{CompressionError, SizeBudgetCompressor};
use crate::upload::{ProgressReporter, UploadStream, REPORT_INTERVAL};

const TITLE_MAX_CHARS: usize = 90;
const AUTHOR_MAX_CHARS: usize = 70;
const ERROR_DETAIL_MAX_CHARS: usize = 200;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("transport rejected the file as too large (limit {limit_bytes} bytes)")]
    PayloadTooLarge { limit_bytes: u64 },

    #[error("upload failed: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// The one line shown to the requester for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Acquisition(AcquisitionError::ExtractionFailed { kind, message }) => match kind {
                FailureKind::AntiBot => "❌ YouTube blocked this download with anti-bot verification.\n\n\
                     To fix this:\n\
                     1. Configure yt-dlp cookies (YTDLP_COOKIES_FILE / YTDLP_COOKIES_B64).\n\
                     2. Ensure the PO token provider is running.\n\
                     3. Try another video or try again later."
                    .to_string(),
                FailureKind::Unavailable => {
                    "❌ This video is unavailable. Try a different link.".to_string()
                }
                FailureKind::Other => format!(
                    "❌ Download failed: {}",
                    message.chars().take(ERROR_DETAIL_MAX_CHARS).collect::<String>()
                ),
            },
            Self::Acquisition(AcquisitionError::NoInfoReturned) => {
                "❌ Failed to download video. Please try again later.".to_string()
            }
            Self::Acquisition(e @ AcquisitionError::OutputFileMissing { .. }) => format!(
                "❌ Download failed: {}",
                e.to_string().chars().take(ERROR_DETAIL_MAX_CHARS).collect::<String>()
            ),
            Self::Compression(_) => {
                "❌ Video is too large and could not be compressed to fit the upload limit."
                    .to_string()
            }
            Self::PayloadTooLarge { limit_bytes } => format!(
                "❌ Telegram rejected the file as too large. App limit is set to {}MB.",
                limit_bytes / MIB
            ),
            Self::Transport(_) | Self::Io(_) => "❌ Failed to upload video.".to_string(),
        }
    }
}

/// Owns one intermediate file and deletes it when released or dropped.
#[derive(Debug)]
pub struct ManagedFile {
    path: PathBuf,
    released: bool,
}

impl ManagedFile {
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "removed intermediate file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove intermediate file"),
        }
    }
}

impl Drop for ManagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed intermediate file on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove intermediate file"),
        }
    }
}

/// What reached the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub filename: String,
    pub size_bytes: u64,
    pub compressed: bool,
    pub title: String,
    pub author: String,
}

pub fn caption(title: &str, author: &str) -> String {
    format!("🎬 {}\n👤 {}", title, author)
}

pub fn compression_notice(size_bytes: u64, limit_bytes: u64) -> String {
    format!(
        "⚙️ Video is {:.1}MB, above the upload limit ({}MB).\nCompressing to fit...",
        size_bytes as f64 / MIB as f64,
        limit_bytes / MIB
    )
}

fn display_title(title: Option<&str>, path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    let title = title.filter(|t| !t.trim().is_empty()).or(stem.as_deref());
    truncate_text(title, TITLE_MAX_CHARS, "Unknown title")
}

pub struct PipelineOrchestrator {
    controller: Arc<AcquisitionController>,
    compressor: Arc<SizeBudgetCompressor>,
    progress_interval: Duration,
}

impl PipelineOrchestrator {
    pub fn new(controller: Arc<AcquisitionController>, compressor: Arc<SizeBudgetCompressor>) -> Self {
        Self {
            controller,
            compressor,
            progress_interval: REPORT_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Run one request to a terminal outcome.
    ///
    /// On return, every file created for the request has been removed.
    pub async fn handle(
        &self,
        request: &AcquisitionRequest,
        status: Arc<dyn StatusSink>,
        transport: &dyn DeliveryTransport,
    ) -> Result<Delivered, PipelineError> {
        let ceiling = request.size_ceiling_bytes();
        let AcquiredMedia {
            path,
            title,
            author,
            workspace,
        } = self.controller.acquire(request).await?;

        let title = display_title(title.as_deref(), &path);
        let author = truncate_text(author.as_deref(), AUTHOR_MAX_CHARS, "Unknown author");
        let mut file = ManagedFile::adopt(path);

        let size = tokio::fs::metadata(file.path()).await?.len();
        info!(path = %file.path().display(), size_bytes = size, ceiling, "acquired media");

        let mut compressed = false;
        if size > ceiling {
            if let Err(e) = status.update(&compression_notice(size, ceiling)).await {
                debug!(error = %e, "compression notice not shown");
            }

            let result = self.compressor.compress_to_fit(file.path(), ceiling).await;
            file.release().await;
            match result {
                Ok(path) => {
                    file = ManagedFile::adopt(path);
                    compressed = true;
                }
                Err(e) => {
                    error!(error = %e, "compression failed");
                    return Err(e.into());
                }
            }
        }

        let outcome = self.upload(&file, status, transport, &title, &author).await;
        file.release().await;
        let workspace_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!(path = %workspace_path.display(), error = %e, "failed to remove request workspace");
        }

        match outcome {
            Ok((filename, size_bytes)) => Ok(Delivered {
                filename,
                size_bytes,
                compressed,
                title,
                author,
            }),
            Err(TransportError::PayloadTooLarge) => {
                warn!(ceiling, "transport rejected payload as too large");
                Err(PipelineError::PayloadTooLarge {
                    limit_bytes: ceiling,
                })
            }
            Err(TransportError::Fault(message)) => {
                error!(error = %message, "upload failed");
                Err(PipelineError::Transport(message))
            }
        }
    }

    async fn upload(
        &self,
        file: &ManagedFile,
        status: Arc<dyn StatusSink>,
        transport: &dyn DeliveryTransport,
        title: &str,
        author: &str,
    ) -> Result<(String, u64), TransportError> {
        let stream = UploadStream::open(file.path())
            .await
            .map_err(|e| TransportError::Fault(format!("could not open upload file: {}", e)))?;
        let total = stream.total_bytes();
        let filename = file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let reporter = ProgressReporter::spawn(
            stream.progress().clone(),
            status,
            title.to_string(),
            author.to_string(),
            self.progress_interval,
        );

        info!(filename = %filename, size_bytes = total, "starting upload");
        match transport
            .send_document(stream, &filename, &caption(title, author))
            .await
        {
            Ok(()) => {
                reporter.finish().await;
                info!(filename = %filename, "upload completed");
                Ok((filename, total))
            }
            Err(e) => {
                reporter.cancel().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::downloader::models::{ExtractedInfo, ExtractionOptions};
    use crate::downloader::{CredentialProvider, CredentialSource, ExtractionClient, ExtractionFailure};
    use crate::test_support::{dir_entries, FixedDuration, RecordingStatus};

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    /// Writes `size` bytes where the template says and reports it, or fails.
    /// A failing run still leaves `partial` behind, the way an interrupted
    /// yt-dlp download does.
    struct FakeExtractor {
        size: usize,
        failure: Option<String>,
        partial: Option<&'static str>,
    }

    #[async_trait]
    impl ExtractionClient for FakeExtractor {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn extract(
            &self,
            _url: &str,
            options: &ExtractionOptions,
        ) -> Result<Option<ExtractedInfo>, ExtractionFailure> {
            if let Some(message) = &self.failure {
                if let Some(name) = self.partial {
                    let dir = Path::new(&options.output_template).parent().unwrap();
                    tokio::fs::write(dir.join(name), b"half a video").await.unwrap();
                }
                return Err(ExtractionFailure::new(message.clone()));
            }
            let path = PathBuf::from(
                options
                    .output_template
                    .replace("%(title)s", "Clip")
                    .replace("%(ext)s", "mp4"),
            );
            tokio::fs::write(&path, vec![1u8; self.size]).await.unwrap();
            Ok(Some(ExtractedInfo {
                title: Some("Clip".into()),
                author: Some("Channel".into()),
                expected_path: path,
            }))
        }
    }

    /// Drains the stream, remembers what it saw, then answers with `reply`.
    struct FakeTransport {
        reply: Result<(), TransportError>,
        seen: Mutex<Vec<(String, String, usize)>>,
    }

    impl FakeTransport {
        fn new(reply: Result<(), TransportError>) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeliveryTransport for FakeTransport {
        async fn send_document(
            &self,
            mut upload: UploadStream,
            filename: &str,
            caption: &str,
        ) -> Result<(), TransportError> {
            let mut body = Vec::new();
            upload.read_to_end(&mut body).await.unwrap();
            self.seen
                .lock()
                .unwrap()
                .push((filename.to_string(), caption.to_string(), body.len()));
            self.reply.clone()
        }
    }

    fn orchestrator(
        download_dir: &Path,
        extractor: FakeExtractor,
        ffmpeg: PathBuf,
    ) -> PipelineOrchestrator {
        let controller = AcquisitionController::new(
            Arc::new(extractor),
            Arc::new(CredentialProvider::new(CredentialSource::default())),
            download_dir,
        );
        let compressor = SizeBudgetCompressor::new(ffmpeg, Arc::new(FixedDuration(Some(60.0))));
        PipelineOrchestrator::new(Arc::new(controller), Arc::new(compressor))
            .with_progress_interval(Duration::from_millis(10))
    }

    fn extractor(size: usize) -> FakeExtractor {
        FakeExtractor {
            size,
            failure: None,
            partial: None,
        }
    }

    fn request(ceiling: u64) -> AcquisitionRequest {
        AcquisitionRequest::new(URL, ceiling).unwrap()
    }

    #[tokio::test]
    async fn small_file_skips_compression_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let pipeline = orchestrator(&downloads, extractor(2048), dir.path().join("no-ffmpeg"));
        let status = Arc::new(RecordingStatus::default());
        let transport = FakeTransport::new(Ok(()));

        let delivered = pipeline
            .handle(&request(MIB), status.clone(), &transport)
            .await
            .unwrap();

        assert_eq!(delivered.filename, "Clip.mp4");
        assert_eq!(delivered.size_bytes, 2048);
        assert!(!delivered.compressed);
        assert_eq!(
            transport.seen.lock().unwrap().clone(),
            vec![("Clip.mp4".to_string(), "🎬 Clip\n👤 Channel".to_string(), 2048)]
        );
        let texts = status.texts();
        assert!(!texts.iter().any(|t| t.contains("Compressing")));
        assert!(texts.last().unwrap().contains("100%"));
        assert!(dir_entries(&downloads).is_empty());
    }

    #[tokio::test]
    async fn missing_transcoder_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let pipeline = orchestrator(&downloads, extractor(4096), dir.path().join("no-ffmpeg"));
        let status = Arc::new(RecordingStatus::default());
        let transport = FakeTransport::new(Ok(()));

        let err = pipeline
            .handle(&request(1024), status.clone(), &transport)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Compression(CompressionError::TranscoderUnavailable)
        ));
        assert!(err.user_message().contains("could not be compressed"));
        assert!(status.texts()[0].contains("above the upload limit"));
        assert!(transport.seen.lock().unwrap().is_empty());
        assert!(dir_entries(&downloads).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn oversized_file_is_replaced_by_compressed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let tools = tempfile::tempdir().unwrap();
        let ffmpeg = crate::test_support::write_script(
            tools.path(),
            "ffmpeg",
            "for last; do :; done\nprintf 'tiny' > \"$last\"",
        );
        let pipeline = orchestrator(&downloads, extractor(4096), ffmpeg);
        let transport = FakeTransport::new(Ok(()));

        let delivered = pipeline
            .handle(&request(1024), Arc::new(RecordingStatus::default()), &transport)
            .await
            .unwrap();

        assert!(delivered.compressed);
        assert_eq!(delivered.filename, "Clip.compressed.mp4");
        assert_eq!(transport.seen.lock().unwrap()[0].2, 4);
        assert!(dir_entries(&downloads).is_empty());
    }

    #[tokio::test]
    async fn acquisition_failure_maps_to_remediation_message() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let failing = FakeExtractor {
            size: 0,
            failure: Some("ERROR: Sign in to confirm you're not a bot".into()),
            partial: None,
        };
        let pipeline = orchestrator(&downloads, failing, dir.path().join("no-ffmpeg"));
        let transport = FakeTransport::new(Ok(()));

        let err = pipeline
            .handle(&request(MIB), Arc::new(RecordingStatus::default()), &transport)
            .await
            .unwrap_err();

        let message = err.user_message();
        assert!(message.contains("YTDLP_COOKIES_FILE / YTDLP_COOKIES_B64"));
        assert!(message.contains("PO token provider"));
        assert!(dir_entries(&downloads).is_empty());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let failing = FakeExtractor {
            size: 0,
            failure: Some("ERROR: unable to download video data: HTTP Error 403: Forbidden".into()),
            partial: Some("Clip.mp4.part"),
        };
        let pipeline = orchestrator(&downloads, failing, dir.path().join("no-ffmpeg"));
        let transport = FakeTransport::new(Ok(()));

        let err = pipeline
            .handle(&request(MIB), Arc::new(RecordingStatus::default()), &transport)
            .await
            .unwrap_err();

        assert!(err.user_message().contains("HTTP Error 403"));
        assert!(transport.seen.lock().unwrap().is_empty());
        assert!(dir_entries(&downloads).is_empty());
    }

    #[tokio::test]
    async fn payload_too_large_is_distinct_from_faults() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let pipeline = orchestrator(&downloads, extractor(512), dir.path().join("no-ffmpeg"));

        let too_large = FakeTransport::new(Err(TransportError::PayloadTooLarge));
        let err = pipeline
            .handle(&request(50 * MIB), Arc::new(RecordingStatus::default()), &too_large)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PayloadTooLarge { limit_bytes } if limit_bytes == 50 * MIB));
        assert_eq!(
            err.user_message(),
            "❌ Telegram rejected the file as too large. App limit is set to 50MB."
        );
        assert!(dir_entries(&downloads).is_empty());

        let broken = FakeTransport::new(Err(TransportError::Fault("connection reset".into())));
        let err = pipeline
            .handle(&request(50 * MIB), Arc::new(RecordingStatus::default()), &broken)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
        assert_eq!(err.user_message(), "❌ Failed to upload video.");
        assert!(dir_entries(&downloads).is_empty());
    }

    #[test]
    fn generic_failures_expose_bounded_detail() {
        let err = PipelineError::Acquisition(AcquisitionError::ExtractionFailed {
            kind: FailureKind::Other,
            message: "x".repeat(500),
        });
        let message = err.user_message();
        assert_eq!(message, format!("❌ Download failed: {}", "x".repeat(200)));

        let unavailable = PipelineError::Acquisition(AcquisitionError::ExtractionFailed {
            kind: FailureKind::Unavailable,
            message: "ERROR: Video unavailable".into(),
        });
        assert!(unavailable.user_message().contains("unavailable"));
    }

    #[test]
    fn managed_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leftover.mp4");
        std::fs::write(&path, b"x").unwrap();

        drop(ManagedFile::adopt(&path));
        assert!(!path.exists());
    }

    #[test]
    fn title_falls_back_to_file_stem() {
        assert_eq!(display_title(None, Path::new("/d/My Clip.mp4")), "My Clip");
        assert_eq!(display_title(Some("  "), Path::new("/d/My Clip.mp4")), "My Clip");
        assert_eq!(display_title(Some("Real"), Path::new("/d/x.mp4")), "Real");
    }

    #[test]
    fn notice_reports_sizes_in_megabytes() {
        assert_eq!(
            compression_notice(75 * MIB + MIB / 2, 50 * MIB),
            "⚙️ Video is 75.5MB, above the upload limit (50MB).\nCompressing to fit..."
        );
    }
}
