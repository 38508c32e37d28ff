//! Error types for the application.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Routing store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to persist routing state to '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load routing state from '{path}': {message}")]
    Load { path: PathBuf, message: String },

    #[error("Failed to encode routing state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Chat {chat_id} is banned")]
    Banned { chat_id: String },
}

/// Transport queue errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Queue backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Queue worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Errors fetching an attachment for re-upload.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

/// Errors produced by a single platform send.
#[derive(Debug, Error)]
pub enum SendError {
    /// The recipient revoked access (blocked the bot, removed it, deleted the chat).
    #[error("Recipient {recipient} refused delivery: {reason}")]
    Forbidden { recipient: String, reason: String },

    #[error("Send failed: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for routing store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
