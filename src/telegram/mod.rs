// Telegram adapters (teloxide) and the update dispatcher

pub mod api;
pub mod bot;

pub use api::{BotClients, TelegramChat, TelegramError, TelegramStatus};
pub use bot::{InstanceLabels, RelayBot, RequestLimits};
