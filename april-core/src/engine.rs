//! The playback engine task.
//!
//! A [`PlaybackBackend`] runs on its own task and is driven by commands from
//! [`EngineHandle`]. It reports back through an ordered event channel and a
//! `watch` snapshot that can be read at any time without waiting. Every
//! message carries the play generation it belongs to, so the controller can
//! ignore anything sent before its latest load or stop.

use crate::backend::{EngineError, PlaybackBackend};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "april::engine";

/// Commands sent from the controller to the engine task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Load { path: PathBuf, generation: u64 },
    Play,
    Pause,
    Stop { generation: u64 },
    Seek(u64),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    DurationChanged(u64),
    PositionChanged(u64),
    /// The media played to its end. Sent once per play cycle.
    EndOfMedia,
    Failed(EngineError),
}

/// An engine report tagged with the generation it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub generation: u64,
    pub kind: EngineEventKind,
}

/// Latest engine state, readable without a round trip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub generation: u64,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub playing: bool,
    /// Number of seeks applied so far
    pub seeks: u64,
}

/// Controller side of the engine. Every method returns immediately.
#[derive(Debug)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    snapshot: watch::Receiver<EngineSnapshot>,
    generation: u64,
    /// Seeks sent; the snapshot is behind until its count catches up
    seeks: u64,
}

impl EngineHandle {
    fn new(
        commands: mpsc::UnboundedSender<EngineCommand>,
        snapshot: watch::Receiver<EngineSnapshot>,
    ) -> Self {
        Self {
            commands,
            snapshot,
            generation: 0,
            seeks: 0,
        }
    }

    /// Handle wired to plain channels instead of a running engine
    #[cfg(test)]
    pub(crate) fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<EngineCommand>,
        watch::Sender<EngineSnapshot>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        (Self::new(command_tx, snapshot_rx), command_rx, snapshot_tx)
    }

    /// The current play generation
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn is_current(&self, event: &EngineEvent) -> bool {
        event.generation == self.generation
    }

    /// Start a new generation and ask the engine to open `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the engine task has exited.
    pub fn load(&mut self, path: PathBuf) -> Result<u64, EngineError> {
        self.generation += 1;
        self.send(EngineCommand::Load {
            path,
            generation: self.generation,
        })?;
        Ok(self.generation)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the engine task has exited.
    pub fn play(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Play)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the engine task has exited.
    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Pause)
    }

    /// Stop playback and start a new generation so reports from the
    /// previous play cycle are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the engine task has exited.
    pub fn stop(&mut self) -> Result<u64, EngineError> {
        self.generation += 1;
        self.send(EngineCommand::Stop {
            generation: self.generation,
        })?;
        Ok(self.generation)
    }

    /// Until the engine applies it, [`Self::position`] reports `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disconnected`] if the engine task has exited.
    pub fn seek(&mut self, position_ms: u64) -> Result<(), EngineError> {
        self.send(EngineCommand::Seek(position_ms))?;
        self.seeks += 1;
        Ok(())
    }

    /// A seek was sent that the engine has not applied yet
    #[must_use]
    pub fn seek_pending(&self) -> bool {
        self.snapshot.borrow().seeks != self.seeks
    }

    #[cfg(test)]
    pub(crate) const fn seeks_sent(&self) -> u64 {
        self.seeks
    }

    /// Ask the engine task to exit. Ignored if it already has.
    pub fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
    }

    /// Last reported position, `None` if the engine has not reported for
    /// the current generation or has not applied the latest seek.
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        self.current_snapshot().map(|s| s.position_ms)
    }

    /// Last reported duration, `None` if not known for the current generation.
    #[must_use]
    pub fn duration(&self) -> Option<u64> {
        self.current_snapshot().map(|s| s.duration_ms)
    }

    fn current_snapshot(&self) -> Option<EngineSnapshot> {
        let snapshot = *self.snapshot.borrow();
        (snapshot.generation == self.generation && snapshot.seeks == self.seeks).then_some(snapshot)
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|e| {
            warn!(target: LOG_TARGET, "Dropped {:?}: engine is not running", e.0);
            EngineError::Disconnected
        })
    }
}

/// Start the engine task for `backend`.
///
/// Position is reported every `tick` while playing. The task exits on
/// [`EngineCommand::Shutdown`], when every handle is dropped, or when
/// `cancel` fires.
pub fn spawn_engine<B: PlaybackBackend>(
    backend: B,
    tick: Duration,
    cancel: CancellationToken,
) -> (
    EngineHandle,
    mpsc::UnboundedReceiver<EngineEvent>,
    JoinHandle<()>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

    let task = EngineTask {
        backend,
        generation: 0,
        playing: false,
        ended: false,
        seeks: 0,
        events: event_tx,
        snapshot: snapshot_tx,
    };
    let join = tokio::spawn(task.run(command_rx, tick, cancel));

    (EngineHandle::new(command_tx, snapshot_rx), event_rx, join)
}

struct EngineTask<B> {
    backend: B,
    generation: u64,
    playing: bool,
    /// End of media already reported for this play cycle
    ended: bool,
    seeks: u64,
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshot: watch::Sender<EngineSnapshot>,
}

impl<B: PlaybackBackend> EngineTask<B> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        info!(target: LOG_TARGET, "Starting playback engine ({} backend)", self.backend.name());

        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(target: LOG_TARGET, "Engine shutting down gracefully");
                    break;
                }
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => {
                        info!(target: LOG_TARGET, "Engine shutting down");
                        break;
                    }
                    Some(command) => self.handle(command),
                },
                _ = ticker.tick(), if self.playing => self.on_tick(),
            }
        }

        self.backend.stop();
    }

    fn handle(&mut self, command: EngineCommand) {
        debug!(target: LOG_TARGET, "Engine command: {command:?}");
        match command {
            EngineCommand::Load { path, generation } => {
                self.generation = generation;
                self.playing = false;
                self.ended = false;
                match self.backend.load(&path) {
                    Ok(duration_ms) => self.emit(EngineEventKind::DurationChanged(duration_ms)),
                    Err(e) => self.emit(EngineEventKind::Failed(e)),
                }
            }
            EngineCommand::Play => match self.backend.play() {
                Ok(()) => self.playing = true,
                Err(e) => {
                    self.playing = false;
                    self.emit(EngineEventKind::Failed(e));
                }
            },
            EngineCommand::Pause => {
                self.backend.pause();
                self.playing = false;
            }
            EngineCommand::Stop { generation } => {
                self.generation = generation;
                self.backend.stop();
                self.playing = false;
                self.ended = false;
            }
            EngineCommand::Seek(position_ms) => {
                self.backend.seek(position_ms);
                self.seeks += 1;
                self.ended = false;
                self.emit(EngineEventKind::PositionChanged(self.backend.position()));
            }
            EngineCommand::Shutdown => {}
        }
        self.publish();
    }

    fn on_tick(&mut self) {
        let position_ms = self.backend.position();
        self.emit(EngineEventKind::PositionChanged(position_ms));

        if !self.ended && self.backend.is_finished() {
            self.ended = true;
            self.playing = false;
            self.backend.pause();
            debug!(target: LOG_TARGET, "End of media at {position_ms}ms");
            self.emit(EngineEventKind::EndOfMedia);
        }
        self.publish();
    }

    fn emit(&self, kind: EngineEventKind) {
        let _ = self.events.send(EngineEvent {
            generation: self.generation,
            kind,
        });
    }

    fn publish(&self) {
        self.snapshot.send_replace(EngineSnapshot {
            generation: self.generation,
            position_ms: self.backend.position(),
            duration_ms: self.backend.duration(),
            playing: self.playing,
            seeks: self.seeks,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ClockBackend;
    use std::path::Path;

    const TICK: Duration = Duration::from_millis(100);

    fn track(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"audio").unwrap();
        path
    }

    async fn next_kind(
        events: &mut mpsc::UnboundedReceiver<EngineEvent>,
        matches: impl Fn(&EngineEventKind) -> bool,
    ) -> EngineEvent {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event.kind) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = track(&dir);
        let backend = ClockBackend::new(Duration::from_secs(3));
        let (mut handle, mut events, _join) = spawn_engine(backend, TICK, CancellationToken::new());

        let generation = handle.load(path).unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            EngineEvent {
                generation,
                kind: EngineEventKind::DurationChanged(3000)
            }
        );
        assert_eq!(handle.duration(), Some(3000));
        assert_eq!(handle.position(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_fails() {
        let backend = ClockBackend::new(Duration::from_secs(3));
        let (mut handle, mut events, _join) = spawn_engine(backend, TICK, CancellationToken::new());

        handle.load(Path::new("/no/such/file.mp3").to_path_buf()).unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            EngineEventKind::Failed(EngineError::Unavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_media_is_sent_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = track(&dir);
        let backend = ClockBackend::new(Duration::from_secs(1));
        let (mut handle, mut events, _join) = spawn_engine(backend, TICK, CancellationToken::new());

        handle.load(path).unwrap();
        handle.play().unwrap();
        next_kind(&mut events, |k| *k == EngineEventKind::EndOfMedia).await;

        let again = tokio::time::timeout(
            Duration::from_secs(5),
            next_kind(&mut events, |k| *k == EngineEventKind::EndOfMedia),
        )
        .await;
        assert!(again.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_positions_increase_while_playing() {
        let dir = tempfile::tempdir().unwrap();
        let path = track(&dir);
        let backend = ClockBackend::new(Duration::from_secs(10));
        let (mut handle, mut events, _join) = spawn_engine(backend, TICK, CancellationToken::new());

        handle.load(path).unwrap();
        handle.play().unwrap();

        let mut last = 0;
        for _ in 0..5 {
            let event = next_kind(&mut events, |k| matches!(k, EngineEventKind::PositionChanged(_))).await;
            let EngineEventKind::PositionChanged(position) = event.kind else {
                unreachable!()
            };
            assert!(position >= last);
            last = position;
        }
        assert!(last > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_starts_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = track(&dir);
        let backend = ClockBackend::new(Duration::from_secs(10));
        let (mut handle, mut events, _join) = spawn_engine(backend, TICK, CancellationToken::new());

        let loaded = handle.load(path).unwrap();
        handle.play().unwrap();
        let stopped = handle.stop().unwrap();
        assert!(stopped > loaded);

        handle.seek(2000).unwrap();
        let event = loop {
            let event = events.recv().await.unwrap();
            if event.generation == stopped {
                break event;
            }
        };
        assert_eq!(event.kind, EngineEventKind::PositionChanged(2000));
        assert!(handle.is_current(&event));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_ignores_previous_generation() {
        let (mut handle, _commands, snapshot) = EngineHandle::detached();
        snapshot.send_replace(EngineSnapshot {
            generation: 0,
            position_ms: 1234,
            duration_ms: 5000,
            playing: true,
            seeks: 0,
        });
        assert_eq!(handle.position(), Some(1234));

        handle.load(PathBuf::from("x.mp3")).unwrap();
        assert_eq!(handle.position(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_task() {
        let backend = ClockBackend::new(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let (handle, _events, join) = spawn_engine(backend, TICK, cancel.clone());

        cancel.cancel();
        join.await.unwrap();
        assert_eq!(handle.play(), Err(EngineError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_unknown_until_seek_applied() {
        let (mut handle, mut commands, snapshot) = EngineHandle::detached();
        snapshot.send_replace(EngineSnapshot {
            position_ms: 2000,
            playing: true,
            ..EngineSnapshot::default()
        });

        handle.seek(8000).unwrap();
        assert!(handle.seek_pending());
        assert_eq!(handle.position(), None);
        assert_eq!(commands.recv().await, Some(EngineCommand::Seek(8000)));

        snapshot.send_replace(EngineSnapshot {
            position_ms: 8000,
            playing: true,
            seeks: 1,
            ..EngineSnapshot::default()
        });
        assert!(!handle.seek_pending());
        assert_eq!(handle.position(), Some(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_count_reaches_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = track(&dir);
        let backend = ClockBackend::new(Duration::from_secs(10));
        let (mut handle, mut events, _join) = spawn_engine(backend, TICK, CancellationToken::new());

        handle.load(path).unwrap();
        handle.seek(3000).unwrap();
        handle.seek(6000).unwrap();
        next_kind(&mut events, |k| *k == EngineEventKind::PositionChanged(6000)).await;

        assert!(!handle.seek_pending());
        assert_eq!(handle.position(), Some(6000));
    }
}
