// Cookie bundle resolution for authenticated extraction
//
// Precedence:
// 1. An explicit cookies.txt path that exists on disk
// 2. A base64 bundle, decoded once into an owner-only temp file
// Anything else means "no credential"; resolution never fails the request.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine;
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// Reference to a cookie file usable by the extractor.
///
/// Handles produced from an encoded bundle share the temporary artifact; it is
/// removed from disk when the last handle (including the provider cache) drops.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    path: PathBuf,
    artifact: Option<Arc<TempPath>>,
}

impl CredentialHandle {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            artifact: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_live(&self) -> bool {
        self.path.is_file()
    }
}

/// Where cookies may come from; both fields are optional.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    pub file: Option<PathBuf>,
    pub encoded: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthResolutionFailure {
    #[error("cookie bundle is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("cookie bundle decodes to nothing")]
    Empty,

    #[error("could not write cookie file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
enum BundleState {
    Unresolved,
    Ready(CredentialHandle),
    Unusable,
}

/// Process-wide cookie resolver.
///
/// The encoded bundle is written at most once; later calls reuse the cached
/// artifact as long as it still exists. A bundle that fails to decode is
/// remembered as unusable and never decoded again.
pub struct CredentialProvider {
    source: CredentialSource,
    artifact_dir: Option<PathBuf>,
    bundle: Mutex<BundleState>,
}

impl CredentialProvider {
    pub fn new(source: CredentialSource) -> Self {
        Self {
            source,
            artifact_dir: None,
            bundle: Mutex::new(BundleState::Unresolved),
        }
    }

    /// Directory for the materialized artifact (system temp dir by default).
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn resolve(&self) -> Option<CredentialHandle> {
        if let Some(path) = &self.source.file {
            if path.is_file() {
                debug!(path = %path.display(), "using configured cookies file");
                return Some(CredentialHandle::from_path(path.clone()));
            }
            warn!(path = %path.display(), "configured cookies file does not exist, ignoring it");
        }

        let encoded = self.source.encoded.as_deref().map(str::trim)?;
        if encoded.is_empty() {
            return None;
        }

        let mut bundle = match self.bundle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match &*bundle {
            BundleState::Unusable => return None,
            BundleState::Ready(handle) if handle.is_live() => return Some(handle.clone()),
            BundleState::Ready(handle) => {
                warn!(path = %handle.path().display(), "cached cookie artifact disappeared, recreating");
            }
            BundleState::Unresolved => {}
        }

        match materialize(encoded, self.artifact_dir.as_deref()) {
            Ok(handle) => {
                info!(path = %handle.path().display(), "materialized cookies from encoded bundle");
                *bundle = BundleState::Ready(handle.clone());
                Some(handle)
            }
            Err(err @ AuthResolutionFailure::Io(_)) => {
                warn!(error = %err, "could not write cookie file, continuing without cookies");
                *bundle = BundleState::Unresolved;
                None
            }
            Err(err) => {
                warn!(error = %err, "encoded cookie bundle is unusable, continuing without cookies");
                *bundle = BundleState::Unusable;
                None
            }
        }
    }

    #[cfg(test)]
    fn bundle_is_unusable(&self) -> bool {
        matches!(*self.bundle.lock().unwrap(), BundleState::Unusable)
    }
}

fn materialize(encoded: &str, dir: Option<&Path>) -> Result<CredentialHandle, AuthResolutionFailure> {
    let compact: String = encoded.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
    if bytes.is_empty() {
        return Err(AuthResolutionFailure::Empty);
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("ytdlp-cookies-").suffix(".txt");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(&bytes)?;
    file.flush()?;

    let temp_path = file.into_temp_path();
    Ok(CredentialHandle {
        path: temp_path.to_path_buf(),
        artifact: Some(Arc::new(temp_path)),
    })
}
