// Upload byte accounting and the periodic status reporter

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::downloader::utils::format_bytes;
use crate::downloader::{StatusError, StatusSink};

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);
pub const PERCENT_STEP: u8 = 5;
const BAR_WIDTH: usize = 20;

/// Shared counter of bytes handed to the transport.
///
/// The reading side bumps it; the reporter only loads it.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    total_bytes: u64,
    sent: Arc<AtomicU64>,
}

impl UploadProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes sent so far, never above the total.
    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire).min(self.total_bytes)
    }

    /// Called once the transport confirmed delivery.
    pub fn mark_complete(&self) {
        self.sent.fetch_max(self.total_bytes, Ordering::AcqRel);
    }

    fn record(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::AcqRel);
    }

    pub fn reader<R>(&self, inner: R) -> ProgressReader<R> {
        ProgressReader {
            inner,
            progress: self.clone(),
        }
    }
}

pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = u128::from(sent) * 100 / u128::from(total);
    pct.min(100) as u8
}

fn milestone(percent: u8) -> u8 {
    percent / PERCENT_STEP * PERCENT_STEP
}

/// `AsyncRead` adapter that counts every byte it yields.
pub struct ProgressReader<R> {
    inner: R,
    progress: UploadProgress,
}

/// The stream a transport receives for one upload.
pub type UploadStream = ProgressReader<tokio::fs::File>;

impl ProgressReader<tokio::fs::File> {
    /// Open `path` for upload, sizing the counter from its metadata.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        Ok(UploadProgress::new(total).reader(file))
    }
}

impl<R> ProgressReader<R> {
    pub fn progress(&self) -> &UploadProgress {
        &self.progress
    }

    pub fn total_bytes(&self) -> u64 {
        self.progress.total_bytes
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.progress.record(read as u64);
            }
        }
        poll
    }
}

pub fn render_upload_progress(sent: u64, total: u64, title: &str, author: &str) -> String {
    let header = format!("⬆️ Uploading video...\n🎬 {}\n👤 {}", title, author);
    if total == 0 {
        return header;
    }

    let percent = percent_of(sent, total);
    let filled = BAR_WIDTH * usize::from(percent) / 100;
    format!(
        "{}\n[{}{}] {}%\n{} / {}",
        header,
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        percent,
        format_bytes(sent.min(total)),
        format_bytes(total),
    )
}

/// Background task that mirrors an [`UploadProgress`] into the status message.
///
/// `finish` and `cancel` wait for the task to end. Dropping the reporter
/// aborts the task, so it never outlives the request that spawned it.
pub struct ProgressReporter {
    progress: UploadProgress,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn spawn(
        progress: UploadProgress,
        sink: Arc<dyn StatusSink>,
        title: String,
        author: String,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(report_loop(progress.clone(), sink, title, author, interval));
        Self {
            progress,
            handle: Some(handle),
        }
    }

    /// Mark the upload complete and wait for the final 100% report.
    pub async fn finish(mut self) {
        self.progress.mark_complete();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "progress reporter ended abnormally");
            }
        }
    }

    /// Stop reporting without a final update and wait until the task is gone.
    pub async fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn report_loop(
    progress: UploadProgress,
    sink: Arc<dyn StatusSink>,
    title: String,
    author: String,
    interval: Duration,
) {
    let mut last_step: Option<u8> = None;
    loop {
        let sent = progress.bytes_sent();
        let total = progress.total_bytes();
        let step = milestone(percent_of(sent, total));

        if last_step.map_or(true, |last| step > last) {
            match sink
                .update(&render_upload_progress(sent, total, &title, &author))
                .await
            {
                Ok(()) | Err(StatusError::NotModified) => {}
                Err(e) => debug!(error = %e, step, "upload progress update failed"),
            }
            last_step = Some(step);
        }

        if sent >= total {
            break;
        }
        tokio::time::sleep(interval).await;
    }
}
