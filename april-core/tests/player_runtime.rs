use april_core::settings::keys;
use april_core::{
    AprilConfig, ClockBackend, ContainerFormat, LyricDisplay, MetadataSource, PlaybackStatus,
    Player, PlayerCommand, PlayerEvent, PlayerHandle, Playlist, Settings, TrackMetadata,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

struct Library {
    dir: tempfile::TempDir,
}

impl Library {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn track(&self, name: &str, lyrics: Option<&str>) -> PathBuf {
        let path = self.dir.path().join(format!("{name}.mp3"));
        std::fs::write(&path, b"audio").unwrap();
        if let Some(lyrics) = lyrics {
            std::fs::write(path.with_extension("lrc"), lyrics).unwrap();
        }
        path
    }
}

fn spawn(tracks: Vec<PathBuf>, settings: Settings) -> (PlayerHandle, tokio::task::JoinHandle<()>) {
    let player = Player::new(
        AprilConfig::default(),
        settings,
        Playlist::with_seed(tracks, 11),
    );
    player.spawn(
        ClockBackend::new(Duration::from_secs(5)),
        CancellationToken::new(),
    )
}

/// Collect events for `duration` of (paused) runtime time
async fn collect(rx: &mut broadcast::Receiver<PlayerEvent>, duration: Duration) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(duration, async {
        while let Ok(event) = rx.recv().await {
            events.push(event);
        }
    })
    .await;
    events
}

fn lyric_texts(events: &[PlayerEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::LyricLineChanged { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn track_changes(events: &[PlayerEvent]) -> Vec<&Path> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::TrackChanged { path } => Some(path.as_path()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_plays_through_playlist_with_lyrics() {
    let library = Library::new();
    let a = library.track("a", Some("[ti:A]\n[00:01.00]one\n[00:03.00]two\n"));
    let b = library.track("b", None);

    let (handle, _join) = spawn(vec![a.clone(), b.clone()], Settings::in_memory());
    let mut rx = handle.subscribe();
    handle.play_pause().unwrap();

    let events = collect(&mut rx, Duration::from_secs(15)).await;

    assert_eq!(track_changes(&events), vec![a.as_path(), b.as_path()]);
    assert_eq!(
        lyric_texts(&events),
        vec![
            "no lyric yet",
            "one",
            "two",
            "no lyric yet",
            "End Of Playlist"
        ]
    );
    assert!(events.contains(&PlayerEvent::EndOfPlaylist));

    let status = handle.status().await.unwrap();
    assert_eq!(status.status, PlaybackStatus::Stopped);
    assert!(status.end_of_playlist);
    assert_eq!(status.lyric_text, "End Of Playlist");
}

#[tokio::test(start_paused = true)]
async fn test_play_pause_after_end_of_playlist_restarts() {
    let library = Library::new();
    let a = library.track("a", None);

    let (handle, _join) = spawn(vec![a.clone()], Settings::in_memory());
    let mut rx = handle.subscribe();
    handle.play_pause().unwrap();
    let events = collect(&mut rx, Duration::from_secs(8)).await;
    assert!(events.contains(&PlayerEvent::EndOfPlaylist));

    handle.play_pause().unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.status, PlaybackStatus::Playing);
    assert_eq!(status.file.as_deref(), Some(a.as_path()));
    assert!(!status.end_of_playlist);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_replays_without_track_change() {
    let library = Library::new();
    let a = library.track("a", Some("[00:01.00]one\n"));
    let b = library.track("b", None);

    let (handle, _join) = spawn(vec![a.clone(), b], Settings::in_memory());
    let mut rx = handle.subscribe();
    handle.send(PlayerCommand::ToggleRepeat).unwrap();
    handle.play_pause().unwrap();

    let events = collect(&mut rx, Duration::from_secs(12)).await;

    assert_eq!(track_changes(&events), vec![a.as_path()]);
    let ones = lyric_texts(&events).into_iter().filter(|t| *t == "one").count();
    assert!(ones >= 2, "expected the line to come back after replay: {events:?}");
    assert!(!events.contains(&PlayerEvent::EndOfPlaylist));
}

#[tokio::test(start_paused = true)]
async fn test_disabling_lyrics_stops_lines() {
    let library = Library::new();
    let a = library.track("a", Some("[00:01.00]one\n[00:02.00]two\n[00:03.00]three\n"));

    let (handle, _join) = spawn(vec![a], Settings::in_memory());
    let mut rx = handle.subscribe();
    handle.play_pause().unwrap();

    let early = collect(&mut rx, Duration::from_millis(1600)).await;
    assert_eq!(lyric_texts(&early), vec!["no lyric yet", "one"]);

    handle.send(PlayerCommand::SetLyricsEnabled(false)).unwrap();
    let later = collect(&mut rx, Duration::from_secs(2)).await;
    assert!(!later.iter().any(|e| matches!(
        e,
        PlayerEvent::LyricLineChanged {
            display: LyricDisplay::Line { .. },
            ..
        }
    )));

    let status = handle.status().await.unwrap();
    assert!(!status.lyrics_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_track_reports_error() {
    let (handle, _join) = spawn(Vec::new(), Settings::in_memory());
    let mut rx = handle.subscribe();

    handle
        .send(PlayerCommand::PlayTrack(PathBuf::from("/no/such/song.mp3")))
        .unwrap();
    let events = collect(&mut rx, Duration::from_millis(100)).await;
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::Error { .. })));

    let status = handle.status().await.unwrap();
    assert_eq!(status.status, PlaybackStatus::Stopped);
    assert_eq!(status.file, None);
}

#[tokio::test(start_paused = true)]
async fn test_session_is_restored_and_saved() {
    let library = Library::new();
    let a = library.track("a", None);

    let settings = Settings::in_memory();
    settings.set(keys::PLAY_SONG_AT_STARTUP, true).unwrap();
    settings.set_last_played(&a, 2500).unwrap();
    settings.set(keys::SHUFFLE, true).unwrap();

    let (handle, join) = spawn(vec![a.clone()], settings.clone());

    let status = handle.status().await.unwrap();
    assert_eq!(status.file.as_deref(), Some(a.as_path()));
    assert_eq!(status.status, PlaybackStatus::Stopped);
    assert!(status.modes.shuffle());

    handle.play_pause().unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.status, PlaybackStatus::Playing);
    assert!((2500..3000).contains(&status.position_ms));

    handle.shutdown();
    join.await.unwrap();

    let (path, position_ms) = settings.last_played().unwrap();
    assert_eq!(path, a);
    assert!(position_ms >= 2500);
    assert_eq!(settings.bool(keys::SHUFFLE), Some(true));
}

/// Names every mp3 after its file stem
struct StemTitles;

#[async_trait]
impl MetadataSource for StemTitles {
    fn name(&self) -> &'static str {
        "stem-titles"
    }

    fn supports(&self, format: ContainerFormat) -> bool {
        format == ContainerFormat::Mp3
    }

    async fn read(&self, path: &Path, format: ContainerFormat) -> april_core::error::Result<TrackMetadata> {
        Ok(TrackMetadata {
            title: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
            format: Some(format),
            ..TrackMetadata::default()
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_metadata_source_fills_status() {
    let library = Library::new();
    let a = library.track("intro", None);
    let flac = library.dir.path().join("outro.flac");
    std::fs::write(&flac, b"audio").unwrap();

    let player = Player::new(
        AprilConfig::default(),
        Settings::in_memory(),
        Playlist::new(vec![a.clone(), flac.clone()]),
    )
    .with_metadata_source(Arc::new(StemTitles));
    let (handle, _join) = player.spawn(
        ClockBackend::new(Duration::from_secs(5)),
        CancellationToken::new(),
    );

    handle.send(PlayerCommand::PlayTrack(a)).unwrap();
    let status = handle.status().await.unwrap();
    let metadata = status.metadata.unwrap();
    assert_eq!(metadata.title.as_deref(), Some("intro"));
    assert_eq!(metadata.format, Some(ContainerFormat::Mp3));

    // Unsupported container: no metadata
    handle.send(PlayerCommand::PlayTrack(flac)).unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.metadata, None);
}

#[tokio::test(start_paused = true)]
async fn test_quick_seeks_both_apply() {
    let library = Library::new();
    let a = library.track("a", None);

    let (handle, _join) = spawn(vec![a], Settings::in_memory());
    let mut rx = handle.subscribe();
    handle.play_pause().unwrap();
    collect(&mut rx, Duration::from_millis(1000)).await;

    let before = handle.status().await.unwrap().position_ms;
    handle.send(PlayerCommand::SeekForward).unwrap();
    handle.send(PlayerCommand::SeekForward).unwrap();
    let after = handle.status().await.unwrap().position_ms;
    assert!(after >= before + 2000, "before={before} after={after}");

    // Pausing straight away keeps the new position
    handle.play_pause().unwrap();
    let paused = handle.status().await.unwrap();
    assert_eq!(paused.status, PlaybackStatus::Paused);
    assert!(paused.position_ms >= before + 2000);
}
