use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Slack API error: {method}: {message}")]
    Api { method: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid lookback window: {0}")]
    InvalidWindow(String),

    #[error("Report artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    pub fn api(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            method: method.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;
