// Update dispatch: one pipeline run per inbound link

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, ChatAction};
use teloxide::update_listeners::Polling;
use teloxide::RequestError;
use tracing::{debug, error, info, warn};

use super::api::{is_polling_conflict, BotClients, TelegramChat, TelegramStatus};
use crate::downloader::{AcquisitionRequest, InvalidRequest};
use crate::pipeline::PipelineOrchestrator;

pub const GREETING: &str = "🎬 Send a YouTube link and I'll return the video.";
pub const INVALID_LINK: &str = "❌ Please send a valid YouTube link.";
pub const DOWNLOADING: &str = "⏳ Downloading video...";
const CONFLICT_LOG_INTERVAL: Duration = Duration::from_secs(60);
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Labels identifying this process in conflict logs.
#[derive(Debug, Clone)]
pub struct InstanceLabels {
    pub app_env: String,
    pub instance_name: String,
    pub token_fingerprint: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub size_ceiling_bytes: u64,
    pub download_target_bytes: u64,
}

/// What to do with an inbound text.
#[derive(Debug)]
pub enum Route {
    Start,
    Ignore,
    Reject,
    Download(AcquisitionRequest),
}

pub fn route(text: &str, limits: RequestLimits) -> Route {
    let text = text.trim();
    if text == "/start" || text.starts_with("/start ") || text.starts_with("/start@") {
        return Route::Start;
    }
    if text.starts_with('/') || text.is_empty() {
        return Route::Ignore;
    }
    match AcquisitionRequest::new(text, limits.size_ceiling_bytes) {
        Ok(request) => Route::Download(request.with_download_target(limits.download_target_bytes)),
        Err(InvalidRequest::UnsupportedUrl(_)) | Err(InvalidRequest::ZeroCeiling) => Route::Reject,
    }
}

/// Lets a repeated log line through at most once per interval.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// State every message handler receives.
#[derive(Clone)]
struct Relay {
    pipeline: Arc<PipelineOrchestrator>,
    upload_bot: Bot,
    limits: RequestLimits,
}

pub struct RelayBot {
    control_bot: Bot,
    relay: Relay,
    labels: InstanceLabels,
}

impl RelayBot {
    pub fn new(
        clients: BotClients,
        pipeline: Arc<PipelineOrchestrator>,
        limits: RequestLimits,
        labels: InstanceLabels,
    ) -> Self {
        Self {
            control_bot: clients.control,
            relay: Relay {
                pipeline,
                upload_bot: clients.upload,
                limits,
            },
            labels,
        }
    }

    /// Long-poll until ctrl-c. Chats are served concurrently, messages
    /// within one chat in arrival order.
    pub async fn run(self) {
        let listener = Polling::builder(self.control_bot.clone())
            .timeout(POLL_TIMEOUT)
            .allowed_updates(vec![AllowedUpdate::Message])
            .build();

        let conflict_log = Arc::new(Mutex::new(LogThrottle::new(CONFLICT_LOG_INTERVAL)));
        let labels = self.labels;
        let on_listener_error = move |err: RequestError| {
            report_listener_error(&conflict_log, &labels, &err);
            std::future::ready(())
        };

        let handler = Update::filter_message().endpoint(handle_message);
        let mut dispatcher = Dispatcher::builder(self.control_bot, handler)
            .dependencies(dptree::deps![self.relay])
            .enable_ctrlc_handler()
            .build();

        info!("polling for updates");
        dispatcher
            .dispatch_with_listener(listener, Arc::new(on_listener_error))
            .await;
        info!("dispatcher stopped");
    }
}

fn report_listener_error(conflict_log: &Mutex<LogThrottle>, labels: &InstanceLabels, err: &RequestError) {
    if !is_polling_conflict(err) {
        warn!(error = %err, "getUpdates failed");
        return;
    }

    let allowed = match conflict_log.lock() {
        Ok(mut throttle) => throttle.allow(Instant::now()),
        Err(poisoned) => poisoned.into_inner().allow(Instant::now()),
    };
    if allowed {
        error!(
            env = %labels.app_env,
            instance = %labels.instance_name,
            pid = std::process::id(),
            token = %labels.token_fingerprint,
            "getUpdates conflict: another bot instance is using this BOT_TOKEN, keep one active instance per token"
        );
    }
}

async fn handle_message(bot: Bot, message: Message, relay: Relay) -> ResponseResult<()> {
    let Some(text) = message.text() else {
        return Ok(());
    };
    let chat_id = message.chat.id;

    let request = match route(text, relay.limits) {
        Route::Ignore => return Ok(()),
        Route::Start => {
            if let Err(e) = bot.send_message(chat_id, GREETING).await {
                warn!(error = %e, chat_id = chat_id.0, "failed to send greeting");
            }
            return Ok(());
        }
        Route::Reject => {
            if let Err(e) = bot.send_message(chat_id, INVALID_LINK).await {
                warn!(error = %e, chat_id = chat_id.0, "failed to reject message");
            }
            return Ok(());
        }
        Route::Download(request) => request,
    };

    info!(chat_id = chat_id.0, url = request.url(), "download request");

    let status_message = match bot.send_message(chat_id, DOWNLOADING).await {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, chat_id = chat_id.0, "could not post status message");
            return Ok(());
        }
    };
    if let Err(e) = bot.send_chat_action(chat_id, ChatAction::UploadVideo).await {
        debug!(error = %e, "chat action not sent");
    }

    let status = Arc::new(TelegramStatus::new(bot.clone(), chat_id, status_message.id));
    let transport = TelegramChat::new(relay.upload_bot.clone(), chat_id);

    match relay.pipeline.handle(&request, status.clone(), &transport).await {
        Ok(delivered) => {
            info!(
                filename = %delivered.filename,
                size_bytes = delivered.size_bytes,
                compressed = delivered.compressed,
                "delivered"
            );
            if let Err(e) = status.delete().await {
                debug!(error = %e, "status message not deleted");
            }
        }
        Err(e) => {
            error!(url = request.url(), error = %e, "request failed");
            if let Err(edit) = bot
                .edit_message_text(chat_id, status_message.id, e.user_message())
                .await
            {
                warn!(error = %edit, "could not report failure to user");
            }
        }
    }
    Ok(())
}
