use crate::backend::EngineError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - edit it to change the defaults.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Playback errors
    #[error("Track unavailable: {path}: {reason}")]
    TrackUnavailable { path: PathBuf, reason: String },

    #[error("No track loaded")]
    NoTrackLoaded,

    #[error("Playback engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Player has shut down")]
    PlayerClosed,

    // Persistence errors
    #[error("Settings store unavailable: {reason}")]
    PersistenceUnavailable { reason: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the player can keep going after this error.
    ///
    /// Every playback, lyric and persistence failure is recoverable; only a
    /// broken config file is reported as fatal to startup.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConfigParseError(_) | Self::ConfigInvalid { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
