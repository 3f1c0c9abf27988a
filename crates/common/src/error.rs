//! Error types shared across vizrec crates.

use std::path::PathBuf;

/// Top-level error type for vizrec operations.
#[derive(Debug, thiserror::Error)]
pub enum VizrecError {
    /// `start` found nothing to composite.
    #[error("No visualizer surface to record")]
    NoLayers,

    /// Audio inclusion was mandated but the host has no live audio graph.
    #[error("Audio graph is not initialized")]
    AudioGraphUnavailable,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using VizrecError.
pub type VizrecResult<T> = Result<T, VizrecError>;

impl VizrecError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error belongs to the configuration class raised by `start`.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoLayers | Self::AudioGraphUnavailable | Self::Config { .. }
        )
    }
}
