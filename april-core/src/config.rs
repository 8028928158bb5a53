use crate::error::{CoreError, Result};
use crate::sync::SyncInterval;
use const_format::concatcp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default seek quantum for seek forward/backward
pub const DEFAULT_SEEK_STEP_MS: u64 = 1000;

/// Default cadence at which the engine reports its position
pub const DEFAULT_ENGINE_TICK_MS: u64 = 100;

/// Default length assumed by the clock backend for tracks of unknown duration
pub const DEFAULT_TRACK_DURATION_SECS: u64 = 240;

/// Forward position jumps larger than this are treated as seeks
pub const DEFAULT_SEEK_TOLERANCE_MS: u64 = 2000;

pub const DEFAULT_PLACEHOLDER_TEXT: &str = "no lyric yet";
pub const DEFAULT_END_OF_PLAYLIST_TEXT: &str = "End Of Playlist";
pub const DEFAULT_IDLE_TEXT: &str = "April Music Player";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AprilConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub lyrics: LyricsConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_seek_step")]
    pub seek_step_ms: u64,
    #[serde(default = "default_engine_tick")]
    pub engine_tick_ms: u64,
    #[serde(default = "default_track_duration")]
    pub track_duration_secs: u64,
}

const fn default_seek_step() -> u64 {
    DEFAULT_SEEK_STEP_MS
}

const fn default_engine_tick() -> u64 {
    DEFAULT_ENGINE_TICK_MS
}

const fn default_track_duration() -> u64 {
    DEFAULT_TRACK_DURATION_SECS
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek_step_ms: default_seek_step(),
            engine_tick_ms: default_engine_tick(),
            track_duration_secs: default_track_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Poll interval in seconds; one of 0.1, 0.2, 0.3, 0.5, 0.7 or 1.0
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: f64,
    #[serde(default = "default_seek_tolerance")]
    pub seek_tolerance_ms: u64,
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    #[serde(default = "default_end_of_playlist_text")]
    pub end_of_playlist_text: String,
    #[serde(default = "default_idle_text")]
    pub idle_text: String,
}

const fn default_true() -> bool {
    true
}

fn default_sync_interval() -> f64 {
    SyncInterval::default().as_secs()
}

const fn default_seek_tolerance() -> u64 {
    DEFAULT_SEEK_TOLERANCE_MS
}

fn default_placeholder_text() -> String {
    DEFAULT_PLACEHOLDER_TEXT.to_string()
}

fn default_end_of_playlist_text() -> String {
    DEFAULT_END_OF_PLAYLIST_TEXT.to_string()
}

fn default_idle_text() -> String {
    DEFAULT_IDLE_TEXT.to_string()
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_secs: default_sync_interval(),
            seek_tolerance_ms: default_seek_tolerance(),
            placeholder_text: default_placeholder_text(),
            end_of_playlist_text: default_end_of_playlist_text(),
            idle_text: default_idle_text(),
        }
    }
}

impl LyricsConfig {
    /// The configured poll interval, falling back to the default when the
    /// value is not one of the allowed choices.
    #[must_use]
    pub fn sync_interval(&self) -> SyncInterval {
        SyncInterval::from_secs(self.sync_interval_secs).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Override for the settings store location
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl SettingsConfig {
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(crate::paths::settings_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to ~/.config/april/april.log
    #[serde(default)]
    pub enabled: bool,
}

impl AprilConfig {
    /// Get the config file path (~/.config/april/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default location, writing a template on first run
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or an
    /// error if the file cannot be read, parsed or validated.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path())
    }

    /// Load config from `path`, writing a template there if it does not exist
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or an
    /// error if the file cannot be read, parsed or validated.
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config text
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigInvalid`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if SyncInterval::from_secs(self.lyrics.sync_interval_secs).is_none() {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "lyrics.sync_interval_secs must be one of {:?}, got {}",
                    SyncInterval::ALL.map(SyncInterval::as_secs),
                    self.lyrics.sync_interval_secs
                ),
            });
        }
        if self.playback.engine_tick_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "playback.engine_tick_ms must be greater than zero".into(),
            });
        }
        if self.playback.seek_step_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "playback.seek_step_ms must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = concatcp!(
    r"# April Music Player configuration
# ~/.config/april/config.toml

[playback]
# How far seek forward/backward moves, in milliseconds
seek_step_ms = ",
    DEFAULT_SEEK_STEP_MS,
    r"
# How often the playback engine reports its position, in milliseconds
engine_tick_ms = ",
    DEFAULT_ENGINE_TICK_MS,
    r"
# Length assumed for tracks whose duration is unknown (headless playback)
track_duration_secs = ",
    DEFAULT_TRACK_DURATION_SECS,
    r#"

[lyrics]
enabled = true
# Lyric refresh rate in seconds: 0.1, 0.2, 0.3, 0.5, 0.7 or 1.0
# Shorter intervals give smoother syncing but use more CPU
sync_interval_secs = 0.5
# Forward jumps larger than this (milliseconds) are treated as seeks
seek_tolerance_ms = "#,
    DEFAULT_SEEK_TOLERANCE_MS,
    r#"
placeholder_text = ""#,
    DEFAULT_PLACEHOLDER_TEXT,
    r#""
end_of_playlist_text = ""#,
    DEFAULT_END_OF_PLAYLIST_TEXT,
    r#""
idle_text = ""#,
    DEFAULT_IDLE_TEXT,
    r#""

[settings]
# Where mode flags and the last played song are stored
# path = "~/.config/april/settings.json"

[logging]
# Also write logs to ~/.config/april/april.log
enabled = false
"#
);
