//! The playback state controller.
//!
//! Owns the play/pause/stop state, pause bookkeeping and mode flags, and
//! turns user operations into engine commands. It never waits on the
//! engine: commands go out through [`EngineHandle`] and results come back
//! through [`PlaybackController::on_engine_event`].

use crate::engine::{EngineEvent, EngineEventKind, EngineHandle};
use crate::error::{CoreError, Result};
use crate::mode::ModeFlags;
use crate::settings::Settings;
use crate::sync::LyricDisplay;
use crate::time::millis_to_secs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "april::controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

/// Playback state. `is_paused` implies `is_playing`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub file: Option<PathBuf>,
    pub is_playing: bool,
    pub is_paused: bool,
    /// Meaningful only while paused
    pub paused_position_ms: u64,
}

impl PlaybackState {
    #[must_use]
    pub const fn status(&self) -> PlaybackStatus {
        match (self.is_playing, self.is_paused) {
            (true, true) => PlaybackStatus::Paused,
            (true, false) => PlaybackStatus::Playing,
            _ => PlaybackStatus::Stopped,
        }
    }

    /// Back to defaults, keeping the file
    fn reset(&mut self) {
        self.is_playing = false;
        self.is_paused = false;
        self.paused_position_ms = 0;
    }
}

/// Events broadcast by the player to UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    ModeChanged(ModeFlags),
    PlaybackStateChanged {
        status: PlaybackStatus,
        position_ms: u64,
    },
    TrackChanged { path: PathBuf },
    DurationChanged { duration_ms: u64 },
    LyricLineChanged { display: LyricDisplay, text: String },
    EndOfPlaylist,
    /// A recoverable failure to report to the user
    Error { message: String },
}

/// What the controller decided when the media ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfMediaAction {
    /// Repeat is on; the same track restarted from 0
    Replayed,
    /// The navigator should pick the next track in playlist order
    AdvanceNext,
    /// The navigator should pick the next track from the random queue
    AdvanceRandom,
}

/// Result of a mode toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    /// `false` when the flag is suppressed and the toggle did nothing
    pub changed: bool,
    /// Shuffle became active, directly or by restoration
    pub rebuild_random_queue: bool,
}

#[derive(Debug)]
pub struct PlaybackController {
    engine: EngineHandle,
    state: PlaybackState,
    modes: ModeFlags,
    settings: Settings,
    seek_step_ms: u64,
    /// Last position the engine confirmed for the current generation
    committed_position_ms: u64,
    duration_ms: u64,
    /// Position to start from on the next play from `Stopped`
    resume_at_ms: Option<u64>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlaybackController {
    /// Create a controller, restoring mode flags from `settings`.
    #[must_use]
    pub fn new(
        engine: EngineHandle,
        settings: Settings,
        seek_step_ms: u64,
        events: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        let modes = ModeFlags::restore(&settings);
        info!(target: LOG_TARGET, "Restored playback mode {:?}", modes.active());
        Self {
            engine,
            state: PlaybackState::default(),
            modes,
            settings,
            seek_step_ms,
            committed_position_ms: 0,
            duration_ms: 0,
            resume_at_ms: None,
            events,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &PlaybackState {
        &self.state
    }

    #[must_use]
    pub const fn status(&self) -> PlaybackStatus {
        self.state.status()
    }

    #[must_use]
    pub fn current_file(&self) -> Option<&Path> {
        self.state.file.as_deref()
    }

    #[must_use]
    pub const fn modes(&self) -> ModeFlags {
        self.modes
    }

    #[must_use]
    pub const fn is_in_pause_state(&self) -> bool {
        self.state.is_paused
    }

    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Current position. Uses the engine's latest report, falling back to the
    /// last committed position when the engine has none for this generation
    /// or is still behind a seek.
    #[must_use]
    pub fn position_ms(&self) -> u64 {
        match self.state.status() {
            PlaybackStatus::Stopped => self.committed_position_ms,
            PlaybackStatus::Paused => self.state.paused_position_ms,
            PlaybackStatus::Playing => self.engine.position().unwrap_or(self.committed_position_ms),
        }
    }

    #[must_use]
    pub fn current_time_seconds(&self) -> f64 {
        millis_to_secs(self.position_ms())
    }

    /// Make the next play from `Stopped` start at `position_ms`.
    pub fn set_resume_position(&mut self, position_ms: u64) {
        self.resume_at_ms = Some(position_ms);
    }

    /// Record `path` as the track to play.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TrackUnavailable`] if `path` is not a readable
    /// file. Nothing changes in that case.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(unavailable(path, "not a regular file")),
            Err(e) => return Err(unavailable(path, &e.to_string())),
        }

        let was_playing = self.state.is_playing;
        self.state = PlaybackState {
            file: Some(path.to_path_buf()),
            ..PlaybackState::default()
        };
        self.committed_position_ms = 0;
        self.duration_ms = 0;
        self.resume_at_ms = None;

        info!(target: LOG_TARGET, "Loaded {}", path.display());
        self.emit(PlayerEvent::TrackChanged {
            path: path.to_path_buf(),
        });
        if was_playing {
            // Drop whatever the previous track is still reporting
            self.engine.stop()?;
            self.emit_state();
        }
        Ok(())
    }

    /// Start playback, or resume if paused. Does nothing while playing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoTrackLoaded`] if no track was loaded, or
    /// [`CoreError::Engine`] if the engine task is gone.
    pub fn play(&mut self) -> Result<()> {
        let Some(file) = self.state.file.clone() else {
            return Err(CoreError::NoTrackLoaded);
        };

        match self.state.status() {
            PlaybackStatus::Playing => Ok(()),
            PlaybackStatus::Paused => self.resume(),
            PlaybackStatus::Stopped => {
                self.engine.load(file)?;
                let start_ms = self.resume_at_ms.take().unwrap_or(0);
                if start_ms > 0 {
                    self.engine.seek(start_ms)?;
                }
                self.engine.play()?;
                self.state.is_playing = true;
                self.committed_position_ms = start_ms;
                self.emit_state();
                Ok(())
            }
        }
    }

    /// `Stopped` plays, `Playing` pauses, `Paused` resumes.
    ///
    /// # Errors
    ///
    /// See [`Self::play`].
    pub fn play_pause(&mut self) -> Result<()> {
        match self.state.status() {
            PlaybackStatus::Stopped => self.play(),
            PlaybackStatus::Playing => self.pause(),
            PlaybackStatus::Paused => self.resume(),
        }
    }

    fn pause(&mut self) -> Result<()> {
        let position_ms = self.engine.position().unwrap_or(self.committed_position_ms);
        self.engine.pause()?;
        self.state.is_paused = true;
        self.state.paused_position_ms = position_ms;
        self.committed_position_ms = position_ms;
        debug!(target: LOG_TARGET, "Paused at {position_ms}ms");
        self.emit_state();
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let position_ms = self.state.paused_position_ms;
        self.engine.seek(position_ms)?;
        self.engine.play()?;
        self.state.is_paused = false;
        self.state.paused_position_ms = 0;
        self.committed_position_ms = position_ms;
        debug!(target: LOG_TARGET, "Resumed at {position_ms}ms");
        self.emit_state();
        Ok(())
    }

    /// Stop playback. Takes effect even if a play is still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Engine`] if the engine task is gone. The state is
    /// `Stopped` either way.
    pub fn stop(&mut self) -> Result<()> {
        self.state.reset();
        self.committed_position_ms = 0;
        self.resume_at_ms = None;
        self.emit_state();
        self.engine.stop()?;
        Ok(())
    }

    /// Jump forward one seek step. Returns the new position, or `None` when
    /// not playing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Engine`] if the engine task is gone.
    pub fn seek_forward(&mut self) -> Result<Option<u64>> {
        let target = self.position_ms().saturating_add(self.seek_step_ms);
        self.seek_to(target)
    }

    /// Jump back one seek step. Returns the new position, or `None` when not
    /// playing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Engine`] if the engine task is gone.
    pub fn seek_backward(&mut self) -> Result<Option<u64>> {
        let target = self.position_ms().saturating_sub(self.seek_step_ms);
        self.seek_to(target)
    }

    /// Move to `position_ms`, clamped to the track duration when known.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Engine`] if the engine task is gone.
    pub fn seek_to(&mut self, position_ms: u64) -> Result<Option<u64>> {
        if !self.state.is_playing {
            return Ok(None);
        }
        let target = if self.duration_ms > 0 {
            position_ms.min(self.duration_ms)
        } else {
            position_ms
        };

        self.engine.seek(target)?;
        self.committed_position_ms = target;
        if self.state.is_paused {
            self.state.paused_position_ms = target;
        }
        Ok(Some(target))
    }

    pub fn toggle_repeat(&mut self) -> ModeChange {
        self.apply_toggle(ModeFlags::toggle_repeat)
    }

    pub fn toggle_shuffle(&mut self) -> ModeChange {
        self.apply_toggle(ModeFlags::toggle_shuffle)
    }

    pub fn toggle_loop_playlist(&mut self) -> ModeChange {
        self.apply_toggle(ModeFlags::toggle_loop_playlist)
    }

    fn apply_toggle(&mut self, toggle: fn(&mut ModeFlags) -> bool) -> ModeChange {
        let before = self.modes;
        if !toggle(&mut self.modes) {
            debug!(target: LOG_TARGET, "Toggle ignored, flag is suppressed");
            return ModeChange {
                changed: false,
                rebuild_random_queue: false,
            };
        }

        self.modes.save(&self.settings);
        info!(target: LOG_TARGET, "Playback mode is now {:?}", self.modes.active());
        self.emit(PlayerEvent::ModeChanged(self.modes));
        ModeChange {
            changed: true,
            rebuild_random_queue: !before.shuffle() && self.modes.shuffle(),
        }
    }

    /// Persist mode flags and, if a track is loaded, the session position.
    pub fn save_session(&self) {
        self.modes.save(&self.settings);
        if let Some(file) = &self.state.file {
            if let Err(e) = self.settings.set_last_played(file, self.position_ms()) {
                warn!(target: LOG_TARGET, "Could not save session: {e}");
            }
        }
    }

    /// Ask the engine task to exit.
    pub fn shutdown_engine(&self) {
        self.engine.shutdown();
    }

    /// Apply an engine report. Reports from an earlier generation are
    /// dropped. Returns the track-advance decision when the media ended.
    pub fn on_engine_event(&mut self, event: EngineEvent) -> Option<EndOfMediaAction> {
        if !self.engine.is_current(&event) {
            debug!(
                target: LOG_TARGET,
                "Dropping stale engine event from generation {} (current {})",
                event.generation,
                self.engine.generation()
            );
            return None;
        }

        match event.kind {
            EngineEventKind::DurationChanged(duration_ms) => {
                self.duration_ms = duration_ms;
                self.emit(PlayerEvent::DurationChanged { duration_ms });
                None
            }
            EngineEventKind::PositionChanged(position_ms) => {
                // Reports queued before a pending seek carry the old position
                if !self.state.is_paused && !self.engine.seek_pending() {
                    self.committed_position_ms = position_ms;
                }
                None
            }
            EngineEventKind::EndOfMedia => self.on_end_of_media(),
            EngineEventKind::Failed(e) => {
                warn!(target: LOG_TARGET, "Playback failed: {e}");
                self.state.reset();
                self.committed_position_ms = 0;
                self.emit_state();
                self.emit(PlayerEvent::Error {
                    message: e.to_string(),
                });
                None
            }
        }
    }

    fn on_end_of_media(&mut self) -> Option<EndOfMediaAction> {
        if !self.state.is_playing {
            return None;
        }

        if self.modes.repeat() {
            debug!(target: LOG_TARGET, "Repeating track");
            let replay = self.engine.seek(0).and_then(|()| self.engine.play());
            if let Err(e) = replay {
                warn!(target: LOG_TARGET, "Could not repeat track: {e}");
                self.state.reset();
                self.emit_state();
                return None;
            }
            self.committed_position_ms = 0;
            return Some(EndOfMediaAction::Replayed);
        }

        self.state.reset();
        self.committed_position_ms = self.duration_ms;
        self.emit_state();
        Some(if self.modes.shuffle() {
            EndOfMediaAction::AdvanceRandom
        } else {
            EndOfMediaAction::AdvanceNext
        })
    }

    fn emit_state(&self) {
        self.emit(PlayerEvent::PlaybackStateChanged {
            status: self.state.status(),
            position_ms: self.position_ms(),
        });
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}

fn unavailable(path: &Path, reason: &str) -> CoreError {
    CoreError::TrackUnavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
