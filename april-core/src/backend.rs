//! The audio backend contract hosted by the playback engine task.
//!
//! A backend does the actual decoding and output. The core never implements
//! one beyond [`ClockBackend`], which keeps time without producing sound so
//! the player can run headless and under test.

use crate::time::DurationExt;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors reported by a playback backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The media file is missing or cannot be opened
    #[error("media file {path} is missing or unreadable: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// The backend could not decode or start the media
    #[error("failed to play {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("no media loaded")]
    NothingLoaded,

    /// The engine task has shut down
    #[error("playback engine is not running")]
    Disconnected,
}

/// An audio backend driven by the engine task.
///
/// Methods are called only from the engine task and must not block for long;
/// heavy decoding belongs on the backend's own threads.
pub trait PlaybackBackend: Send + 'static {
    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Open `path` for playback, returning its duration in milliseconds
    /// (0 when unknown).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] for missing files and
    /// [`EngineError::Decode`] for files the backend cannot handle.
    fn load(&mut self, path: &Path) -> Result<u64, EngineError>;

    /// Start or resume playback of the loaded media.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is loaded or output cannot start.
    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self);

    /// Stop and rewind to the start. The media stays loaded.
    fn stop(&mut self);

    /// Move to `position_ms`, clamped to `[0, duration]`.
    fn seek(&mut self, position_ms: u64);

    fn position(&self) -> u64;

    fn duration(&self) -> u64;

    /// Whether the loaded media has played to its end.
    fn is_finished(&self) -> bool;
}

/// Backend that validates files and advances a clock instead of decoding.
#[derive(Debug)]
pub struct ClockBackend {
    default_duration_ms: u64,
    durations: HashMap<PathBuf, u64>,
    loaded: Option<PathBuf>,
    duration_ms: u64,
    /// Position when the clock was last started or moved
    anchor_ms: u64,
    /// Set while playing
    started_at: Option<Instant>,
}

impl ClockBackend {
    /// Create a backend that assumes `default_duration` for every track.
    #[must_use]
    pub fn new(default_duration: Duration) -> Self {
        Self {
            default_duration_ms: default_duration.as_millis_u64(),
            durations: HashMap::new(),
            loaded: None,
            duration_ms: 0,
            anchor_ms: 0,
            started_at: None,
        }
    }

    /// Use a specific duration for `path`.
    #[must_use]
    pub fn with_track_duration(mut self, path: impl Into<PathBuf>, duration: Duration) -> Self {
        self.durations.insert(path.into(), duration.as_millis_u64());
        self
    }

    #[must_use]
    pub fn loaded(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }
}

impl PlaybackBackend for ClockBackend {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn load(&mut self, path: &Path) -> Result<u64, EngineError> {
        let unavailable = |reason: String| EngineError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let meta = file.metadata().map_err(|e| unavailable(e.to_string()))?;
        if !meta.is_file() {
            return Err(unavailable("not a regular file".into()));
        }

        self.duration_ms = self
            .durations
            .get(path)
            .copied()
            .unwrap_or(self.default_duration_ms);
        self.loaded = Some(path.to_path_buf());
        self.anchor_ms = 0;
        self.started_at = None;
        Ok(self.duration_ms)
    }

    fn play(&mut self) -> Result<(), EngineError> {
        if self.loaded.is_none() {
            return Err(EngineError::NothingLoaded);
        }
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.anchor_ms = self.position();
        self.started_at = None;
    }

    fn stop(&mut self) {
        self.anchor_ms = 0;
        self.started_at = None;
    }

    fn seek(&mut self, position_ms: u64) {
        self.anchor_ms = position_ms.min(self.duration_ms);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    fn position(&self) -> u64 {
        let elapsed = self
            .started_at
            .map_or(0, |started| started.elapsed().as_millis_u64());
        self.anchor_ms.saturating_add(elapsed).min(self.duration_ms)
    }

    fn duration(&self) -> u64 {
        self.duration_ms
    }

    fn is_finished(&self) -> bool {
        self.loaded.is_some() && self.position() >= self.duration_ms
    }
}
