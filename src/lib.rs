pub mod config;
pub mod downloader;
pub mod media;
pub mod pipeline;
pub mod telegram;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConfigError};
pub use pipeline::{Delivered, PipelineError, PipelineOrchestrator};
