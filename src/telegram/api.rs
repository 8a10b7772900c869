// Telegram delivery and status adapters over teloxide
//
// Uploads stream from disk through the progress reader; nothing is buffered
// in memory.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use teloxide::{ApiError, RequestError};
use tracing::debug;

use crate::downloader::{DeliveryTransport, StatusError, StatusSink, TransportError};
use crate::upload::UploadStream;

pub const UPLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
pub const UPLOAD_READ_TIMEOUT: Duration = Duration::from_secs(1200);
pub const UPLOAD_WRITE_TIMEOUT: Duration = Duration::from_secs(1200);
const ENTITY_TOO_LARGE: &str = "request entity too large";

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Invalid Bot API URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Could not build HTTP client: {0}")]
    Client(String),
}

/// The configured `.../bot` prefix without its `/bot` tail.
///
/// teloxide appends `/bot{token}/{method}` itself.
pub fn api_root(base_url: &str) -> &str {
    let trimmed = base_url.trim_end_matches('/');
    trimmed.strip_suffix("/bot").unwrap_or(trimmed)
}

/// One bot handle for control calls and one with upload-sized timeouts.
#[derive(Clone)]
pub struct BotClients {
    pub control: Bot,
    pub upload: Bot,
}

impl BotClients {
    pub fn connect(base_url: &str, token: &str) -> Result<Self, TelegramError> {
        let root = api_root(base_url);
        let url = reqwest::Url::parse(root).map_err(|e| TelegramError::InvalidUrl {
            url: root.to_string(),
            message: e.to_string(),
        })?;

        let control_client = teloxide::net::default_reqwest_settings()
            .build()
            .map_err(|e| TelegramError::Client(e.to_string()))?;
        // reqwest has no separate read/write budget; the total covers both
        let upload_client = teloxide::net::default_reqwest_settings()
            .connect_timeout(UPLOAD_CONNECT_TIMEOUT)
            .timeout(UPLOAD_READ_TIMEOUT + UPLOAD_WRITE_TIMEOUT)
            .build()
            .map_err(|e| TelegramError::Client(e.to_string()))?;

        Ok(Self {
            control: Bot::with_client(token, control_client).set_api_url(url.clone()),
            upload: Bot::with_client(token, upload_client).set_api_url(url),
        })
    }
}

fn mentions_entity_too_large(text: &str) -> bool {
    text.to_ascii_lowercase().contains(ENTITY_TOO_LARGE)
}

/// A proxy in front of the Bot API answers 413 with an HTML page, which
/// surfaces as unparseable JSON rather than a typed API error.
pub fn transport_error(e: RequestError) -> TransportError {
    match e {
        RequestError::Api(ApiError::RequestEntityTooLarge) => TransportError::PayloadTooLarge,
        RequestError::Api(ApiError::Unknown(ref description))
            if mentions_entity_too_large(description) =>
        {
            TransportError::PayloadTooLarge
        }
        RequestError::InvalidJson { ref raw, .. } if mentions_entity_too_large(raw) => {
            TransportError::PayloadTooLarge
        }
        other => TransportError::Fault(other.to_string()),
    }
}

pub fn status_error(e: RequestError) -> StatusError {
    match e {
        RequestError::Api(ApiError::MessageNotModified) => StatusError::NotModified,
        other => StatusError::Failed(other.to_string()),
    }
}

/// Another process is long-polling with the same token.
pub fn is_polling_conflict(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
}

/// The requesting chat, as a delivery target.
pub struct TelegramChat {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramChat {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl DeliveryTransport for TelegramChat {
    async fn send_document(
        &self,
        upload: UploadStream,
        filename: &str,
        caption: &str,
    ) -> Result<(), TransportError> {
        debug!(
            chat_id = self.chat_id.0,
            filename,
            size_bytes = upload.total_bytes(),
            "sendDocument"
        );
        let document = InputFile::read(upload).file_name(filename.to_string());
        self.bot
            .send_document(self.chat_id, document)
            .caption(caption)
            .await
            .map(|_| ())
            .map_err(transport_error)
    }
}

/// One status message, edited in place.
pub struct TelegramStatus {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

impl TelegramStatus {
    pub fn new(bot: Bot, chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            bot,
            chat_id,
            message_id,
        }
    }

    pub async fn delete(&self) -> Result<(), RequestError> {
        self.bot
            .delete_message(self.chat_id, self.message_id)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl StatusSink for TelegramStatus {
    async fn update(&self, text: &str) -> Result<(), StatusError> {
        self.bot
            .edit_message_text(self.chat_id, self.message_id, text)
            .await
            .map(|_| ())
            .map_err(status_error)
    }
}
