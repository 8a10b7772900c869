// yt-dlp extraction client - drives the native `yt-dlp` binary
//
// One invocation both downloads the media and prints the info JSON
// (`--dump-json --no-simulate`), so title, uploader and the planned
// filename come back together with the file.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::downloader::errors::ExtractionFailure;
use crate::downloader::models::{ExtractedInfo, ExtractionOptions, ExtractionStrategy};
use crate::downloader::traits::ExtractionClient;
use crate::downloader::utils::{run_output_with_timeout, tail_lines, ProcessError};

/// Ceiling for a single download run.
const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const STDERR_TAIL_LINES: usize = 20;

/// The slice of yt-dlp's info JSON the relay reads.
#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    creator: Option<String>,
    filename: Option<String>,
    #[serde(rename = "_filename")]
    legacy_filename: Option<String>,
}

pub struct YtDlpClient {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: EXTRACTION_TIMEOUT,
        }
    }

    /// Build command arguments for one attempt
    pub fn build_args(url: &str, options: &ExtractionOptions) -> Vec<String> {
        let mut args = vec![
            "--no-simulate".to_string(),
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "-f".to_string(),
            options.format_expression.clone(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            options.output_template.clone(),
        ];

        if let Some(path) = &options.cookies_file {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }

        match options.strategy {
            ExtractionStrategy::Standard => {
                args.push("--extractor-args".to_string());
                args.push("youtube:fetch_pot=auto".to_string());
                if let Some(base_url) = &options.token_provider_url {
                    args.push("--extractor-args".to_string());
                    args.push(format!("youtubepot-bgutilhttp:base_url={}", base_url));
                }
            }
            ExtractionStrategy::Legacy => {
                args.push("--extractor-args".to_string());
                args.push("youtube:player_client=tv,android_vr;fetch_pot=never".to_string());
            }
        }

        args.push(url.to_string());
        args
    }

    /// Parse the info JSON printed on stdout.
    ///
    /// Returns `None` when no JSON object or no target filename is present.
    pub fn parse_info(stdout: &[u8]) -> Option<ExtractedInfo> {
        let text = String::from_utf8_lossy(stdout);
        let line = text
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| l.starts_with('{'))?;

        let json: InfoJson = match serde_json::from_str(line) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "yt-dlp printed malformed info JSON");
                return None;
            }
        };

        fn non_empty(value: Option<String>) -> Option<String> {
            value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }

        let expected_path = non_empty(json.filename).or_else(|| non_empty(json.legacy_filename))?;
        let author = non_empty(json.uploader)
            .or_else(|| non_empty(json.channel))
            .or_else(|| non_empty(json.creator));

        Some(ExtractedInfo {
            title: non_empty(json.title),
            author,
            expected_path: PathBuf::from(expected_path),
        })
    }
}

#[async_trait]
impl ExtractionClient for YtDlpClient {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract(
        &self,
        url: &str,
        options: &ExtractionOptions,
    ) -> Result<Option<ExtractedInfo>, ExtractionFailure> {
        let args = Self::build_args(url, options);
        debug!(binary = %self.binary.display(), args = ?args, "running yt-dlp");

        let output = run_output_with_timeout(&self.binary, &args, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::NotFound { .. } => ExtractionFailure::new("yt-dlp is not installed"),
                other => ExtractionFailure::new(other.to_string()),
            })?;

        if !output.status.success() {
            let tail = tail_lines(&output.stderr, STDERR_TAIL_LINES);
            let message = if tail.is_empty() {
                format!("yt-dlp exited with {}", output.status)
            } else {
                tail
            };
            return Err(ExtractionFailure::new(message));
        }

        let info = Self::parse_info(&output.stdout);
        if let Some(info) = &info {
            info!(
                strategy = %options.strategy,
                path = %info.expected_path.display(),
                "yt-dlp finished"
            );
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(strategy: ExtractionStrategy) -> ExtractionOptions {
        ExtractionOptions {
            format_expression: "best[ext=mp4]/best".to_string(),
            output_template: "downloads/%(title)s.%(ext)s".to_string(),
            cookies_file: None,
            strategy,
            token_provider_url: Some("http://127.0.0.1:4416".to_string()),
        }
    }

    #[test]
    fn standard_args_use_token_provider_and_cookies() {
        let mut opts = options(ExtractionStrategy::Standard);
        opts.cookies_file = Some(PathBuf::from("/tmp/c.txt"));
        let args = YtDlpClient::build_args("https://youtu.be/x", &opts);

        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/tmp/c.txt"));
        assert!(args.contains(&"youtubepot-bgutilhttp:base_url=http://127.0.0.1:4416".to_string()));
        assert!(!args.iter().any(|a| a.contains("fetch_pot=never")));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
    }

    #[test]
    fn legacy_args_disable_tokens() {
        let args = YtDlpClient::build_args("https://youtu.be/x", &options(ExtractionStrategy::Legacy));
        assert!(args.iter().any(|a| a.contains("fetch_pot=never")));
        assert!(!args.iter().any(|a| a.starts_with("youtubepot-bgutilhttp")));
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn parse_info_reads_last_json_line() {
        let stdout = br#"some noise
{"title": "Test Video", "uploader": "Someone", "filename": "downloads/Test Video.mp4"}
"#;
        let info = YtDlpClient::parse_info(stdout).unwrap();
        assert_eq!(info.title.as_deref(), Some("Test Video"));
        assert_eq!(info.author.as_deref(), Some("Someone"));
        assert_eq!(info.expected_path, PathBuf::from("downloads/Test Video.mp4"));
    }

    #[test]
    fn parse_info_falls_back_through_author_fields() {
        let stdout = br#"{"title": "T", "uploader": "", "channel": "Chan", "_filename": "a.webm"}"#;
        let info = YtDlpClient::parse_info(stdout).unwrap();
        assert_eq!(info.author.as_deref(), Some("Chan"));
        assert_eq!(info.expected_path, PathBuf::from("a.webm"));
    }

    #[test]
    fn parse_info_without_json_is_none() {
        assert!(YtDlpClient::parse_info(b"").is_none());
        assert!(YtDlpClient::parse_info(b"{not json").is_none());
        assert!(YtDlpClient::parse_info(br#"{"title": "no file"}"#).is_none());
        assert!(YtDlpClient::parse_info(br#"{"title": null, "filename": "  "}"#).is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let client = YtDlpClient::new("definitely-not-yt-dlp-91c2");
        let err = client
            .extract("https://youtu.be/x", &options(ExtractionStrategy::Standard))
            .await
            .unwrap_err();
        assert_eq!(err.message, "yt-dlp is not installed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_of_failed_run_becomes_message() {
        let dir = tempfile::tempdir().unwrap();
        let bin = crate::test_support::write_script(
            dir.path(),
            "yt-dlp",
            "echo \"ERROR: [youtube] x: Sign in to confirm you're not a bot\" >&2\nexit 1",
        );
        let client = YtDlpClient::new(bin);
        let err = client
            .extract("https://youtu.be/x", &options(ExtractionStrategy::Standard))
            .await
            .unwrap_err();
        assert!(err.message.contains("not a bot"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_returns_info() {
        let dir = tempfile::tempdir().unwrap();
        let bin = crate::test_support::write_script(
            dir.path(),
            "yt-dlp",
            "echo '{\"title\": \"Clip\", \"creator\": \"Maker\", \"filename\": \"/tmp/Clip.mp4\"}'",
        );
        let client = YtDlpClient::new(bin);
        let info = client
            .extract("https://youtu.be/x", &options(ExtractionStrategy::Legacy))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert_eq!(info.author.as_deref(), Some("Maker"));
    }
}
