pub mod backend;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod lrc;
pub mod metadata;
pub mod mode;
pub mod navigator;
pub mod paths;
pub mod player;
pub mod settings;
pub mod sync;
pub mod time;

pub use backend::{ClockBackend, EngineError, PlaybackBackend};
pub use config::{AprilConfig, LoggingConfig, LyricsConfig, PlaybackConfig, SettingsConfig};
pub use controller::{
    EndOfMediaAction, ModeChange, PlaybackController, PlaybackState, PlaybackStatus, PlayerEvent,
};
pub use engine::{spawn_engine, EngineCommand, EngineEvent, EngineEventKind, EngineHandle};
pub use error::CoreError;
pub use lrc::{LrcMetadata, LyricLine, LyricParseWarning, LyricTrack};
pub use metadata::{ContainerFormat, MetadataSource, TrackMetadata};
pub use mode::{ModeFlags, PlaybackMode};
pub use navigator::{Advance, NavStep, Playlist, PlaylistNavigator, RandomPlaybackQueue};
pub use paths::{
    config_dir, log_file_path, settings_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME, LOG_FILE_NAME,
    SETTINGS_FILE_NAME,
};
pub use player::{Player, PlayerCommand, PlayerHandle, PlayerStatus};
pub use settings::{JsonFileStore, MemoryStore, Settings, SettingsStore};
pub use sync::{LyricDisplay, LyricSync, SyncCursor, SyncInterval, SyncState};
pub use time::DurationExt;
