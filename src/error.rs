// Error taxonomy for the ingestion and selection pipeline

use crate::config::ConfigError;
use thiserror::Error;

/// Result type for pipeline operations
pub type PickerResult<T> = Result<T, PickerError>;

/// Errors that can occur while bootstrapping, streaming or decoding
#[derive(Debug, Error)]
pub enum PickerError {
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Session cookie not found: {0}")]
    MissingCookie(String),

    #[error("Room id not found in page data")]
    MissingRoomId,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Decompression error: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("Invalid page data: {0}")]
    PageData(#[from] serde_json::Error),

    #[error("Queue closed")]
    QueueClosed,

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Actuator task stopped")]
    ActuatorClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
