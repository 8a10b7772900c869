// Environment configuration and upload-limit derivation

use std::path::PathBuf;

use tracing::warn;

use crate::downloader::CredentialSource;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org/bot";
pub const PUBLIC_API_HOST: &str = "api.telegram.org";
/// Upload cap of the public Bot API.
pub const PUBLIC_API_UPLOAD_LIMIT_MB: u64 = 50;
/// Upload cap of a self-hosted Bot API server.
pub const LOCAL_API_UPLOAD_LIMIT_MB: u64 = 2000;
pub const DEFAULT_POT_PROVIDER_URL: &str = "http://127.0.0.1:4416";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
const MIB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: Option<String>,
    pub api_base_url: String,
    /// Upload cap the bot enforces, already clamped to the endpoint limit.
    pub upload_limit_mb: u64,
    /// Size the format selector aims for, never above `upload_limit_mb`.
    pub video_target_mb: u64,
    pub endpoint_limit_mb: u64,
    pub download_dir: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub cookies_b64: Option<String>,
    pub pot_provider_url: String,
    pub ytdlp_bin: Option<PathBuf>,
    pub ffmpeg_bin: Option<PathBuf>,
    pub ffprobe_bin: Option<PathBuf>,
    pub app_env: String,
    pub instance_name: String,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_base_url = var("TELEGRAM_BOT_API_BASE_URL")
            .or_else(|| var("TELEGRAM_BOT_API_HOSTPORT").map(|hp| format!("http://{}/bot", hp)))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let endpoint_limit_mb = endpoint_limit_mb(&api_base_url);
        let configured_upload_mb = parse_mb("MAX_UPLOAD_SIZE_MB", var("MAX_UPLOAD_SIZE_MB"))?
            .unwrap_or(endpoint_limit_mb);
        let upload_limit_mb = configured_upload_mb.min(endpoint_limit_mb);
        if configured_upload_mb > endpoint_limit_mb {
            warn!(
                configured_mb = configured_upload_mb,
                endpoint_limit_mb,
                using_mb = upload_limit_mb,
                "MAX_UPLOAD_SIZE_MB exceeds the endpoint limit; point TELEGRAM_BOT_API_BASE_URL \
                 at a self-hosted Bot API server for larger uploads"
            );
        }
        let video_target_mb = parse_mb("MAX_VIDEO_SIZE_MB", var("MAX_VIDEO_SIZE_MB"))?
            .unwrap_or(upload_limit_mb)
            .min(upload_limit_mb);

        Ok(Self {
            bot_token: var("BOT_TOKEN"),
            api_base_url,
            upload_limit_mb,
            video_target_mb,
            endpoint_limit_mb,
            download_dir: var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            cookies_file: var("YTDLP_COOKIES_FILE").map(PathBuf::from),
            cookies_b64: var("YTDLP_COOKIES_B64"),
            pot_provider_url: var("YTDLP_POT_PROVIDER_URL")
                .unwrap_or_else(|| DEFAULT_POT_PROVIDER_URL.to_string()),
            ytdlp_bin: var("YTDLP_BIN").map(PathBuf::from),
            ffmpeg_bin: var("FFMPEG_BIN").map(PathBuf::from),
            ffprobe_bin: var("FFPROBE_BIN").map(PathBuf::from),
            app_env: var("APP_ENV").unwrap_or_else(|| "local".to_string()),
            instance_name: var("INSTANCE_NAME")
                .or_else(|| var("HOSTNAME"))
                .unwrap_or_else(|| "unknown-host".to_string()),
        })
    }

    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("BOT_TOKEN".to_string()))
    }

    /// Loggable stand-in for the token.
    pub fn token_fingerprint(&self) -> String {
        token_fingerprint(self.bot_token.as_deref())
    }

    /// Hard ceiling for a delivered file.
    pub fn upload_ceiling_bytes(&self) -> u64 {
        self.upload_limit_mb * MIB
    }

    pub fn download_target_bytes(&self) -> u64 {
        self.video_target_mb * MIB
    }

    pub fn credential_source(&self) -> CredentialSource {
        CredentialSource {
            file: self.cookies_file.clone(),
            encoded: self.cookies_b64.clone(),
        }
    }
}

/// 50 MB for the public Bot API, 2000 MB for anything else.
pub fn endpoint_limit_mb(base_url: &str) -> u64 {
    let host = reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    match host.as_deref() {
        Some(PUBLIC_API_HOST) => PUBLIC_API_UPLOAD_LIMIT_MB,
        _ => LOCAL_API_UPLOAD_LIMIT_MB,
    }
}

pub fn token_fingerprint(token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => {
            let tail: String = t
                .chars()
                .rev()
                .take(6)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("...{}", tail)
        }
        _ => "missing".to_string(),
    }
}

fn parse_mb(key: &str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Ok(mb) => Ok(Some(mb)),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{:?} is not a whole number of megabytes ({})", raw, e),
        }),
    }
}
