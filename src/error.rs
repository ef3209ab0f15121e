//! Error types shared by the bot library.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, BotError>;

/// Errors produced while bootstrapping, dispatching or persisting a session.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Version fetch failed: {0}")]
    Version(#[from] reqwest::Error),

    #[error("Phone number prompt failed: {0}")]
    Prompt(String),

    #[error("Failed to send message to {to}: {reason}")]
    Send { to: String, reason: String },

    #[error("Credential store error: {0}")]
    Store(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl BotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
