// Acquisition controller - bounded strategy fallback around one extraction backend
//
// Strategy:
// 1. Standard flow (token provider, cookies when available)
// 2. Legacy flow, only without cookies and only after an anti-bot failure
// Never more than two attempts per request.
//
// Each request downloads into its own scratch directory under the download
// dir. Failed attempts drop it, taking yt-dlp's partial files along.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::credentials::CredentialProvider;
use super::errors::AcquisitionError;
use super::extractors::{classify_failure, FailureKind};
use super::models::{
    AcquiredMedia, AcquisitionRequest, AcquisitionResult, ExtractedInfo, ExtractionOptions,
    ExtractionStrategy,
};
use super::traits::ExtractionClient;

/// Container the extractor merges into when the planned extension differs.
const MERGED_CONTAINER_EXT: &str = "mp4";
const WORKSPACE_PREFIX: &str = "request-";

pub struct AcquisitionController {
    client: Arc<dyn ExtractionClient>,
    credentials: Arc<CredentialProvider>,
    download_dir: PathBuf,
    token_provider_url: Option<String>,
}

impl AcquisitionController {
    pub fn new(
        client: Arc<dyn ExtractionClient>,
        credentials: Arc<CredentialProvider>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            credentials,
            download_dir: download_dir.into(),
            token_provider_url: None,
        }
    }

    pub fn with_token_provider(mut self, base_url: Option<String>) -> Self {
        self.token_provider_url = base_url;
        self
    }

    /// Prefer an mp4 that already fits, then any mp4, then anything.
    pub fn format_expression(size_ceiling_bytes: u64) -> String {
        format!(
            "best[ext=mp4][filesize<{}]/best[ext=mp4]/best",
            size_ceiling_bytes
        )
    }

    /// Ordered strategies for one request. The legacy flow is only eligible
    /// when no credential is in play.
    pub fn plan_strategies(has_credential: bool) -> Vec<ExtractionStrategy> {
        if has_credential {
            vec![ExtractionStrategy::Standard]
        } else {
            vec![ExtractionStrategy::Standard, ExtractionStrategy::Legacy]
        }
    }

    pub async fn acquire(&self, request: &AcquisitionRequest) -> AcquisitionResult {
        let workspace = self.create_workspace().await?;
        debug!(workspace = %workspace.path().display(), "created request workspace");

        let credential = request
            .credential()
            .cloned()
            .or_else(|| self.credentials.resolve());
        let strategies = Self::plan_strategies(credential.is_some());
        let output_template = workspace
            .path()
            .join("%(title)s.%(ext)s")
            .display()
            .to_string();

        let mut last_error = AcquisitionError::NoInfoReturned;

        for (idx, strategy) in strategies.iter().enumerate() {
            let options = ExtractionOptions {
                format_expression: Self::format_expression(request.format_target_bytes()),
                output_template: output_template.clone(),
                cookies_file: credential.as_ref().map(|c| c.path().to_path_buf()),
                strategy: *strategy,
                token_provider_url: self.token_provider_url.clone(),
            };

            info!(
                backend = self.client.name(),
                attempt = idx + 1,
                strategy = %strategy,
                cookies = options.cookies_file.is_some(),
                url = request.url(),
                "acquisition attempt"
            );

            match self.client.extract(request.url(), &options).await {
                Ok(Some(extracted)) => return locate_output(extracted, workspace),
                Ok(None) => return Err(AcquisitionError::NoInfoReturned),
                Err(failure) => {
                    let kind = classify_failure(&failure.message);
                    warn!(
                        attempt = idx + 1,
                        strategy = %strategy,
                        kind = %kind,
                        error = %failure.message,
                        "acquisition attempt failed"
                    );
                    let error = AcquisitionError::ExtractionFailed {
                        kind,
                        message: failure.message,
                    };
                    let has_fallback = idx + 1 < strategies.len();
                    if !(kind.is_strategy_dependent() && has_fallback) {
                        return Err(error);
                    }
                    info!("anti-bot check hit, retrying once with the legacy flow");
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    async fn create_workspace(&self) -> Result<TempDir, AcquisitionError> {
        let setup_failed = |e: std::io::Error| AcquisitionError::ExtractionFailed {
            kind: FailureKind::Other,
            message: format!(
                "could not prepare download directory {}: {}",
                self.download_dir.display(),
                e
            ),
        };

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(setup_failed)?;
        tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.download_dir)
            .map_err(setup_failed)
    }
}

/// Candidate locations for the produced file, in the order they are tried.
pub fn output_candidates(expected: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![expected.to_path_buf()];
    let merged = expected.with_extension(MERGED_CONTAINER_EXT);
    if merged != expected {
        candidates.push(merged);
    }
    candidates
}

fn locate_output(extracted: ExtractedInfo, workspace: TempDir) -> AcquisitionResult {
    let found = output_candidates(&extracted.expected_path)
        .into_iter()
        .find(|p| p.is_file());

    match found {
        Some(path) => Ok(AcquiredMedia {
            path,
            title: extracted.title,
            author: extracted.author,
            workspace,
        }),
        None => Err(AcquisitionError::OutputFileMissing {
            expected_path: extracted.expected_path,
        }),
    }
}
