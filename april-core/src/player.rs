//! The player runtime.
//!
//! One task owns the controller, the lyric engine and the playlist, and
//! serializes everything that touches them: user commands from
//! [`PlayerHandle`], engine reports and the lyric poll timer. The engine
//! runs on a second task (see [`crate::engine`]).

use crate::backend::PlaybackBackend;
use crate::config::AprilConfig;
use crate::controller::{EndOfMediaAction, PlaybackController, PlaybackStatus, PlayerEvent};
use crate::engine::{spawn_engine, EngineEvent};
use crate::error::{CoreError, Result};
use crate::lrc::{self, LyricTrack};
use crate::metadata::{ContainerFormat, MetadataSource, TrackMetadata};
use crate::mode::ModeFlags;
use crate::navigator::{Advance, NavStep, PlaylistNavigator};
use crate::settings::{keys, Settings};
use crate::sync::{LyricDisplay, LyricSync, SyncInterval, SyncState};
use crate::time::{format_progress, millis_to_secs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "april::player";

/// Commands accepted by the player task
#[derive(Debug)]
pub enum PlayerCommand {
    /// Load and play a specific file
    PlayTrack(PathBuf),
    Play,
    PlayPause,
    Stop,
    SeekForward,
    SeekBackward,
    SeekTo(u64),
    PreviousLine,
    NextLine,
    Next,
    Previous,
    ToggleRepeat,
    ToggleShuffle,
    ToggleLoopPlaylist,
    SetLyricsEnabled(bool),
    SetSyncInterval(SyncInterval),
    Status(oneshot::Sender<PlayerStatus>),
    Shutdown,
}

/// Snapshot of everything a UI shows
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub status: PlaybackStatus,
    pub file: Option<PathBuf>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub current_time_seconds: f64,
    pub is_in_pause_state: bool,
    pub modes: ModeFlags,
    pub lyrics_enabled: bool,
    pub sync_state: SyncState,
    pub sync_interval: SyncInterval,
    /// Text currently on the lyric display
    pub lyric_text: String,
    /// `[mm:ss/mm:ss]`
    pub progress: String,
    pub end_of_playlist: bool,
    pub metadata: Option<TrackMetadata>,
}

/// Cloneable handle for sending commands to the player task
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    /// Subscribe to player events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Queue a command. Results are reported as [`PlayerEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PlayerClosed`] if the player task has exited.
    pub fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CoreError::PlayerClosed)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerClosed`] if the player task has exited.
    pub fn play_pause(&self) -> Result<()> {
        self.send(PlayerCommand::PlayPause)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::PlayerClosed`] if the player task has exited.
    pub fn stop(&self) -> Result<()> {
        self.send(PlayerCommand::Stop)
    }

    /// Ask the player to save its session and exit.
    pub fn shutdown(&self) {
        let _ = self.commands.send(PlayerCommand::Shutdown);
    }

    /// Current player status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PlayerClosed`] if the player task has exited.
    pub async fn status(&self) -> Result<PlayerStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(PlayerCommand::Status(tx))?;
        rx.await.map_err(|_| CoreError::PlayerClosed)
    }
}

/// Player configuration, consumed by [`Player::spawn`]
pub struct Player {
    config: AprilConfig,
    settings: Settings,
    navigator: Box<dyn PlaylistNavigator>,
    metadata: Option<Arc<dyn MetadataSource>>,
}

impl Player {
    #[must_use]
    pub fn new(
        config: AprilConfig,
        settings: Settings,
        navigator: impl PlaylistNavigator + 'static,
    ) -> Self {
        Self {
            config,
            settings,
            navigator: Box::new(navigator),
            metadata: None,
        }
    }

    /// Read display metadata for each loaded track with `source`.
    #[must_use]
    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(source);
        self
    }

    /// Start the engine and player tasks. Both exit on
    /// [`PlayerCommand::Shutdown`] or when `cancel` fires; the session is
    /// saved first.
    pub fn spawn<B: PlaybackBackend>(
        self,
        backend: B,
        cancel: CancellationToken,
    ) -> (PlayerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);

        let tick = Duration::from_millis(self.config.playback.engine_tick_ms);
        let (engine, engine_events, engine_join) = spawn_engine(backend, tick, cancel.child_token());

        let controller = PlaybackController::new(
            engine,
            self.settings.clone(),
            self.config.playback.seek_step_ms,
            event_tx.clone(),
        );
        let lyrics = LyricSync::new(&self.config.lyrics, self.settings.clone());

        let task = PlayerTask {
            controller,
            lyrics,
            navigator: self.navigator,
            metadata_source: self.metadata,
            settings: self.settings,
            idle_text: self.config.lyrics.idle_text,
            events: event_tx.clone(),
            end_of_playlist: false,
            metadata: None,
        };
        let join = tokio::spawn(task.run(command_rx, engine_events, engine_join, cancel));

        (
            PlayerHandle {
                commands: command_tx,
                events: event_tx,
            },
            join,
        )
    }
}

struct PlayerTask {
    controller: PlaybackController,
    lyrics: LyricSync,
    navigator: Box<dyn PlaylistNavigator>,
    metadata_source: Option<Arc<dyn MetadataSource>>,
    settings: Settings,
    idle_text: String,
    events: broadcast::Sender<PlayerEvent>,
    /// The end-of-playlist marker is showing
    end_of_playlist: bool,
    metadata: Option<TrackMetadata>,
}

impl PlayerTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        engine_join: JoinHandle<()>,
        cancel: CancellationToken,
    ) {
        info!(target: LOG_TARGET, "Starting player");
        self.restore_session().await;

        let mut next_tick = Instant::now() + self.lyrics.interval().as_duration();

        loop {
            let was_ticking = self.lyrics.is_ticking();

            tokio::select! {
                () = cancel.cancelled() => {
                    info!(target: LOG_TARGET, "Player shutting down gracefully");
                    break;
                }
                command = commands.recv() => match command {
                    Some(PlayerCommand::Shutdown) | None => {
                        info!(target: LOG_TARGET, "Player shutting down");
                        break;
                    }
                    Some(command) => self.handle(command).await,
                },
                event = engine_events.recv() => match event {
                    Some(event) => self.on_engine_event(event).await,
                    None => {
                        warn!(target: LOG_TARGET, "Playback engine exited");
                        break;
                    }
                },
                () = sleep_until(next_tick), if was_ticking => {
                    let display = self.lyrics.poll(Some(self.controller.position_ms()));
                    self.publish(display);
                    // Re-read so interval changes apply from this tick on
                    next_tick = Instant::now() + self.lyrics.interval().as_duration();
                }
            }

            if !was_ticking && self.lyrics.is_ticking() {
                next_tick = Instant::now() + self.lyrics.interval().as_duration();
            }
        }

        self.controller.save_session();
        self.controller.shutdown_engine();
        if let Err(e) = engine_join.await {
            warn!(target: LOG_TARGET, "Engine task failed: {e}");
        }
    }

    /// Rebuild the random queue for a restored shuffle mode, and reload the
    /// last played track if the user asked for that.
    async fn restore_session(&mut self) {
        if self.controller.modes().shuffle() {
            self.navigator.rebuild_random_queue();
        }

        if !self.settings.bool(keys::PLAY_SONG_AT_STARTUP).unwrap_or(false) {
            return;
        }
        let Some((path, position_ms)) = self.settings.last_played() else {
            return;
        };

        info!(target: LOG_TARGET, "Restoring {} at {position_ms}ms", path.display());
        match self.open_track(&path).await {
            Ok(()) => self.controller.set_resume_position(position_ms),
            Err(e) => warn!(target: LOG_TARGET, "Could not restore last played track: {e}"),
        }
    }

    async fn handle(&mut self, command: PlayerCommand) {
        let before = self.controller.status();
        let result = match command {
            PlayerCommand::PlayTrack(path) => self.play_track(&path).await,
            PlayerCommand::Play => {
                if self.needs_restart() {
                    self.restart_playlist().await
                } else {
                    self.controller.play()
                }
            }
            PlayerCommand::PlayPause => {
                if self.needs_restart() {
                    self.restart_playlist().await
                } else {
                    self.controller.play_pause()
                }
            }
            PlayerCommand::Stop => self.controller.stop(),
            PlayerCommand::SeekForward => {
                let seek = self.controller.seek_forward();
                self.after_seek(seek)
            }
            PlayerCommand::SeekBackward => {
                let seek = self.controller.seek_backward();
                self.after_seek(seek)
            }
            PlayerCommand::SeekTo(position_ms) => {
                let seek = self.controller.seek_to(position_ms);
                self.after_seek(seek)
            }
            PlayerCommand::PreviousLine => {
                let target = self
                    .lyrics
                    .previous_line_position(self.controller.position_ms());
                self.seek_to_line(target)
            }
            PlayerCommand::NextLine => {
                let target = self.lyrics.next_line_position(self.controller.position_ms());
                self.seek_to_line(target)
            }
            PlayerCommand::Next => {
                let advance = if self.controller.modes().shuffle() {
                    Advance::Random { wrap: true }
                } else {
                    Advance::Sequential { wrap: true }
                };
                let step = self.navigator.next(advance);
                self.follow_step(step).await
            }
            PlayerCommand::Previous => {
                let step = self.navigator.previous(self.controller.modes().shuffle());
                self.follow_step(step).await
            }
            PlayerCommand::ToggleRepeat => {
                let change = self.controller.toggle_repeat();
                self.after_mode_change(change.rebuild_random_queue);
                Ok(())
            }
            PlayerCommand::ToggleShuffle => {
                let change = self.controller.toggle_shuffle();
                self.after_mode_change(change.rebuild_random_queue);
                Ok(())
            }
            PlayerCommand::ToggleLoopPlaylist => {
                let change = self.controller.toggle_loop_playlist();
                self.after_mode_change(change.rebuild_random_queue);
                Ok(())
            }
            PlayerCommand::SetLyricsEnabled(enabled) => {
                self.set_lyrics_enabled(enabled).await;
                Ok(())
            }
            PlayerCommand::SetSyncInterval(interval) => {
                self.lyrics.set_interval(interval);
                debug!(target: LOG_TARGET, "Lyric poll interval set to {}ms", interval.as_millis());
                Ok(())
            }
            PlayerCommand::Status(reply) => {
                let _ = reply.send(self.status());
                Ok(())
            }
            PlayerCommand::Shutdown => Ok(()),
        };

        self.follow_status(before);
        if let Err(e) = result {
            self.report(&e);
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        let before = self.controller.status();
        let action = self.controller.on_engine_event(event);
        self.follow_status(before);

        match action {
            Some(EndOfMediaAction::Replayed) => {
                let display = self.lyrics.on_seek(0);
                self.publish(display);
            }
            Some(EndOfMediaAction::AdvanceNext) => {
                let wrap = self.controller.modes().loop_playlist();
                let step = self.navigator.next(Advance::Sequential { wrap });
                self.advance_to(step).await;
            }
            Some(EndOfMediaAction::AdvanceRandom) => {
                let step = self.navigator.next(Advance::Random { wrap: false });
                self.advance_to(step).await;
            }
            None => {}
        }
    }

    async fn advance_to(&mut self, step: NavStep) {
        let before = self.controller.status();
        if let Err(e) = self.follow_step(step).await {
            self.report(&e);
        }
        self.follow_status(before);
    }

    async fn follow_step(&mut self, step: NavStep) -> Result<()> {
        match step {
            NavStep::Track(path) => self.play_track(&path).await,
            NavStep::EndOfPlaylist => {
                self.show_end_of_playlist();
                Ok(())
            }
            NavStep::Empty => {
                debug!(target: LOG_TARGET, "Playlist is empty");
                Ok(())
            }
        }
    }

    /// Nothing loaded yet, or the end-of-playlist marker is up
    fn needs_restart(&self) -> bool {
        self.end_of_playlist || self.controller.current_file().is_none()
    }

    async fn restart_playlist(&mut self) -> Result<()> {
        let step = self.navigator.restart(self.controller.modes().shuffle());
        self.follow_step(step).await
    }

    fn show_end_of_playlist(&mut self) {
        info!(target: LOG_TARGET, "End of playlist");
        if self.controller.status() != PlaybackStatus::Stopped {
            if let Err(e) = self.controller.stop() {
                self.report(&e);
            }
        }
        self.end_of_playlist = true;
        let display = self.lyrics.on_end_of_playlist();
        self.publish(display);
        self.emit(PlayerEvent::EndOfPlaylist);
    }

    async fn play_track(&mut self, path: &Path) -> Result<()> {
        self.open_track(path).await?;
        let before = self.controller.status();
        let result = self.controller.play();
        self.follow_status(before);
        result
    }

    /// Load `path` into the controller along with its lyrics and metadata.
    async fn open_track(&mut self, path: &Path) -> Result<()> {
        let before = self.controller.status();
        self.controller.load(path)?;
        self.follow_status(before);

        if !self.navigator.select(path) {
            debug!(target: LOG_TARGET, "{} is not in the playlist", path.display());
        }
        self.end_of_playlist = false;

        let lyrics = load_lyrics(path, self.lyrics.enabled()).await;
        self.lyrics.set_track(lyrics);

        self.metadata = match self.metadata_source.clone() {
            Some(source) => read_metadata(source, path).await,
            None => None,
        };
        Ok(())
    }

    /// Bring the lyric engine in line with a controller status change.
    fn follow_status(&mut self, before: PlaybackStatus) {
        let after = self.controller.status();
        if before == after {
            return;
        }
        let display = match after {
            PlaybackStatus::Playing => self.lyrics.on_playback_started(self.controller.position_ms()),
            PlaybackStatus::Paused => {
                self.lyrics.on_paused();
                None
            }
            PlaybackStatus::Stopped => {
                self.lyrics.on_stopped();
                None
            }
        };
        self.publish(display);
    }

    fn after_seek(&mut self, seek: Result<Option<u64>>) -> Result<()> {
        if let Some(position_ms) = seek? {
            let display = self.lyrics.on_seek(position_ms);
            self.publish(display);
        }
        Ok(())
    }

    fn seek_to_line(&mut self, target: Option<u64>) -> Result<()> {
        match target {
            Some(position_ms) => {
                let seek = self.controller.seek_to(position_ms);
                self.after_seek(seek)
            }
            None => Ok(()),
        }
    }

    fn after_mode_change(&mut self, rebuild_random_queue: bool) {
        if rebuild_random_queue {
            self.navigator.rebuild_random_queue();
        }
    }

    async fn set_lyrics_enabled(&mut self, enabled: bool) {
        if !self.lyrics.set_enabled(enabled) {
            return;
        }

        let current = self.controller.current_file().map(Path::to_path_buf);
        let track = match current {
            Some(path) if enabled => load_lyrics(&path, true).await,
            _ => LyricTrack::default(),
        };
        self.lyrics.set_track(track);

        let status = self.controller.status();
        if status != PlaybackStatus::Stopped {
            let display = self.lyrics.on_playback_started(self.controller.position_ms());
            self.publish(display);
            if status == PlaybackStatus::Paused {
                self.lyrics.on_paused();
            }
        }
    }

    fn status(&self) -> PlayerStatus {
        let position_ms = self.controller.position_ms();
        let duration_ms = self.controller.duration_ms();
        let lyric_text = match self.lyrics.shown() {
            Some(display) => self.lyrics.text(display).to_string(),
            None => self.idle_text.clone(),
        };

        PlayerStatus {
            status: self.controller.status(),
            file: self.controller.current_file().map(Path::to_path_buf),
            position_ms,
            duration_ms,
            current_time_seconds: millis_to_secs(position_ms),
            is_in_pause_state: self.controller.is_in_pause_state(),
            modes: self.controller.modes(),
            lyrics_enabled: self.lyrics.enabled(),
            sync_state: self.lyrics.state(),
            sync_interval: self.lyrics.interval(),
            lyric_text,
            progress: format_progress(position_ms, duration_ms),
            end_of_playlist: self.end_of_playlist,
            metadata: self.metadata.clone(),
        }
    }

    fn publish(&self, display: Option<LyricDisplay>) {
        if let Some(display) = display {
            let text = self.lyrics.text(&display).to_string();
            debug!(target: LOG_TARGET, "Lyric: {text}");
            self.emit(PlayerEvent::LyricLineChanged { display, text });
        }
    }

    fn report(&self, error: &CoreError) {
        warn!(target: LOG_TARGET, "{error}");
        self.emit(PlayerEvent::Error {
            message: error.to_string(),
        });
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }
}

/// Companion lyrics for `track`, or an empty track when there are none.
async fn load_lyrics(track: &Path, enabled: bool) -> LyricTrack {
    if !enabled {
        return LyricTrack::default();
    }
    let Some(path) = lrc::find_companion(track).await else {
        debug!(target: LOG_TARGET, "No lyric file for {}", track.display());
        return LyricTrack::default();
    };
    match LyricTrack::load(&path).await {
        Ok(lyrics) => lyrics,
        Err(e) => {
            warn!(target: LOG_TARGET, "Could not read {}: {e}", path.display());
            LyricTrack::default()
        }
    }
}

async fn read_metadata(source: Arc<dyn MetadataSource>, path: &Path) -> Option<TrackMetadata> {
    let format = ContainerFormat::from_path(path)?;
    if !source.supports(format) {
        return None;
    }
    match source.read(path, format).await {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            debug!(target: LOG_TARGET, "{} could not read {}: {e}", source.name(), path.display());
            None
        }
    }
}
