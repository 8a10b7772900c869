use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use youtube_relay_lib::downloader::tools::{report_tools, resolve_binary, ToolType};
use youtube_relay_lib::downloader::{AcquisitionController, CredentialProvider, YtDlpClient};
use youtube_relay_lib::media::{FfprobeDuration, SizeBudgetCompressor};
use youtube_relay_lib::telegram::{BotClients, InstanceLabels, RelayBot, RequestLimits, TelegramError};
use youtube_relay_lib::{Config, ConfigError, PipelineOrchestrator};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn,teloxide=warn")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "bot cannot start");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    let token = config.require_token()?;

    info!(
        env = %config.app_env,
        instance = %config.instance_name,
        pid = std::process::id(),
        token = %config.token_fingerprint(),
        upload_limit_mb = config.upload_limit_mb,
        video_target_mb = config.video_target_mb,
        api = %config.api_base_url,
        "starting bot instance"
    );

    let ytdlp = resolve_binary(ToolType::YtDlp, config.ytdlp_bin.clone());
    let ffmpeg = resolve_binary(ToolType::Ffmpeg, config.ffmpeg_bin.clone());
    let ffprobe = resolve_binary(ToolType::Ffprobe, config.ffprobe_bin.clone());
    report_tools(&[
        (ToolType::YtDlp, ytdlp.as_path()),
        (ToolType::Ffmpeg, ffmpeg.as_path()),
        (ToolType::Ffprobe, ffprobe.as_path()),
    ]);

    let credentials = Arc::new(CredentialProvider::new(config.credential_source()));
    let controller = AcquisitionController::new(
        Arc::new(YtDlpClient::new(ytdlp)),
        credentials,
        config.download_dir.clone(),
    )
    .with_token_provider(Some(config.pot_provider_url.clone()));
    let compressor = SizeBudgetCompressor::new(ffmpeg, Arc::new(FfprobeDuration::new(ffprobe)));
    let pipeline = Arc::new(PipelineOrchestrator::new(
        Arc::new(controller),
        Arc::new(compressor),
    ));

    let clients = BotClients::connect(&config.api_base_url, token)?;
    let bot = RelayBot::new(
        clients,
        pipeline,
        RequestLimits {
            size_ceiling_bytes: config.upload_ceiling_bytes(),
            download_target_bytes: config.download_target_bytes(),
        },
        InstanceLabels {
            app_env: config.app_env.clone(),
            instance_name: config.instance_name.clone(),
            token_fingerprint: config.token_fingerprint(),
        },
    );

    bot.run().await;
    info!("shutting down");
    Ok(())
}
