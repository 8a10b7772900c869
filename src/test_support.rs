// Fixtures shared by unit tests

use std::path::{Path, PathBuf};

/// Write an executable `sh` script standing in for an external binary.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Names of the entries currently in `dir`, sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Status sink that records every text it is asked to show.
#[derive(Default)]
pub struct RecordingStatus {
    texts: std::sync::Mutex<Vec<String>>,
    fail_with: Option<crate::downloader::StatusError>,
}

impl RecordingStatus {
    pub fn failing(error: crate::downloader::StatusError) -> Self {
        Self {
            texts: Default::default(),
            fail_with: Some(error),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl crate::downloader::StatusSink for RecordingStatus {
    async fn update(&self, text: &str) -> Result<(), crate::downloader::StatusError> {
        self.texts.lock().unwrap().push(text.to_string());
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Duration probe with a canned answer.
pub struct FixedDuration(pub Option<f64>);

#[async_trait::async_trait]
impl crate::media::DurationProbe for FixedDuration {
    async fn probe(&self, _path: &Path) -> Option<f64> {
        self.0
    }
}
