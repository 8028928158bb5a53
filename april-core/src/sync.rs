//! Lyric synchronization: keeps the current lyric line consistent with the
//! playback position.
//!
//! [`SyncCursor`] tracks the line index. [`LyricSync`] wraps it in the
//! `Disabled / Idle / Syncing` state machine and decides what text to show.
//! Neither does any timing itself; the player polls on [`LyricSync::interval`].

use crate::config::LyricsConfig;
use crate::lrc::{LyricLine, LyricTrack};
use crate::settings::{keys, Settings};
use crate::time::millis_to_secs;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const LOG_TARGET: &str = "april::sync";

/// Allowed lyric poll intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SyncInterval {
    Ms100,
    Ms200,
    Ms300,
    #[default]
    Ms500,
    Ms700,
    Ms1000,
}

impl SyncInterval {
    pub const ALL: [Self; 6] = [
        Self::Ms100,
        Self::Ms200,
        Self::Ms300,
        Self::Ms500,
        Self::Ms700,
        Self::Ms1000,
    ];

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        match self {
            Self::Ms100 => 100,
            Self::Ms200 => 200,
            Self::Ms300 => 300,
            Self::Ms500 => 500,
            Self::Ms700 => 700,
            Self::Ms1000 => 1000,
        }
    }

    #[must_use]
    pub fn as_secs(self) -> f64 {
        millis_to_secs(self.as_millis())
    }

    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.as_millis())
    }

    /// Match a value in seconds such as `0.3` against the allowed intervals.
    #[must_use]
    pub fn from_secs(secs: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|interval| (interval.as_secs() - secs).abs() < 1e-6)
    }
}

/// Index of the current lyric line for the last queried position
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCursor {
    /// Greatest `i` with `line[i].timestamp_ms <= last_queried_position_ms`, or -1
    current_index: isize,
    last_queried_position_ms: u64,
    /// Forward jumps larger than this are treated as seeks
    tolerance_ms: u64,
    /// Set after a discontinuity so the next query does a full search
    needs_rescan: bool,
}

impl SyncCursor {
    #[must_use]
    pub const fn new(tolerance_ms: u64) -> Self {
        Self {
            current_index: -1,
            last_queried_position_ms: 0,
            tolerance_ms,
            needs_rescan: true,
        }
    }

    #[must_use]
    pub const fn current_index(&self) -> isize {
        self.current_index
    }

    /// The current index as a slice index, `None` before the first line.
    #[must_use]
    pub fn line_index(&self) -> Option<usize> {
        usize::try_from(self.current_index).ok()
    }

    #[must_use]
    pub const fn last_queried_position_ms(&self) -> u64 {
        self.last_queried_position_ms
    }

    /// Forget the current line after a seek, track change or stop.
    pub fn reset(&mut self) {
        self.current_index = -1;
        self.needs_rescan = true;
    }

    /// Move to the line for `position_ms`. Returns `true` if a full binary
    /// search was needed instead of stepping forward from the last index.
    pub fn advance(&mut self, lines: &[LyricLine], position_ms: u64) -> bool {
        let rescan = self.needs_rescan
            || position_ms < self.last_queried_position_ms
            || position_ms - self.last_queried_position_ms > self.tolerance_ms;

        let next = if rescan {
            lines.partition_point(|line| line.timestamp_ms <= position_ms)
        } else {
            let mut next = self.line_index().map_or(0, |i| i + 1);
            while lines.get(next).is_some_and(|line| line.timestamp_ms <= position_ms) {
                next += 1;
            }
            next
        };

        self.current_index = isize::try_from(next).map_or(isize::MAX, |n| n - 1);
        self.last_queried_position_ms = position_ms;
        self.needs_rescan = false;
        rescan
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Lyrics are turned off
    Disabled,
    /// Enabled but nothing to follow (stopped, or no lines)
    Idle,
    /// Following playback on every poll
    Syncing,
}

/// What the lyric display should show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricDisplay {
    Line { index: usize, text: String },
    /// Before the first line, or the track has no lines
    Placeholder,
    /// Playback ran off the end of the playlist
    EndOfPlaylist,
}

/// Lyric synchronization engine
#[derive(Debug)]
pub struct LyricSync {
    enabled: bool,
    playing: bool,
    track: LyricTrack,
    cursor: SyncCursor,
    interval: SyncInterval,
    /// Last value handed out, used to suppress repeats
    shown: Option<LyricDisplay>,
    placeholder_text: String,
    end_of_playlist_text: String,
    settings: Settings,
}

impl LyricSync {
    /// Create the engine, preferring persisted visibility and interval over
    /// the configured defaults.
    #[must_use]
    pub fn new(config: &LyricsConfig, settings: Settings) -> Self {
        let enabled = settings.bool(keys::SHOW_LYRICS).unwrap_or(config.enabled);
        let interval = settings
            .f64(keys::SYNC_THRESHOLD)
            .and_then(SyncInterval::from_secs)
            .unwrap_or_else(|| config.sync_interval());

        debug!(target: LOG_TARGET, "Lyrics enabled: {enabled}, poll interval {}ms", interval.as_millis());

        Self {
            enabled,
            playing: false,
            track: LyricTrack::default(),
            cursor: SyncCursor::new(config.seek_tolerance_ms),
            interval,
            shown: None,
            placeholder_text: config.placeholder_text.clone(),
            end_of_playlist_text: config.end_of_playlist_text.clone(),
            settings,
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        if !self.enabled {
            SyncState::Disabled
        } else if self.playing && !self.track.is_empty() {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Whether the poll timer should run
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.state() == SyncState::Syncing
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn interval(&self) -> SyncInterval {
        self.interval
    }

    #[must_use]
    pub const fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    #[must_use]
    pub const fn track(&self) -> &LyricTrack {
        &self.track
    }

    #[must_use]
    pub const fn shown(&self) -> Option<&LyricDisplay> {
        self.shown.as_ref()
    }

    /// Text for a display value
    #[must_use]
    pub fn text<'a>(&'a self, display: &'a LyricDisplay) -> &'a str {
        match display {
            LyricDisplay::Line { text, .. } => text,
            LyricDisplay::Placeholder => &self.placeholder_text,
            LyricDisplay::EndOfPlaylist => &self.end_of_playlist_text,
        }
    }

    /// Replace the lyrics for a newly loaded track. Pass an empty track when
    /// the media has no lyric file.
    pub fn set_track(&mut self, track: LyricTrack) {
        debug!(target: LOG_TARGET, "Loaded {} lyric lines", track.len());
        self.track = track;
        self.playing = false;
        self.cursor.reset();
        self.shown = None;
    }

    /// Turn lyrics on or off, persisting the choice. Returns `true` if the
    /// value changed.
    ///
    /// Disabling stops polling at once. After enabling, call [`Self::on_seek`]
    /// with the current position to show the right line.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        self.settings.persist(keys::SHOW_LYRICS, enabled);
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        self.cursor.reset();
        self.shown = None;
        debug!(target: LOG_TARGET, "Lyrics {}", if enabled { "enabled" } else { "disabled" });
        true
    }

    /// Change the poll interval, persisting it. Applies from the next tick.
    pub fn set_interval(&mut self, interval: SyncInterval) {
        self.interval = interval;
        self.settings.persist(keys::SYNC_THRESHOLD, interval.as_secs());
    }

    /// Playback started or resumed at `position_ms`.
    pub fn on_playback_started(&mut self, position_ms: u64) -> Option<LyricDisplay> {
        self.playing = true;
        self.resync(position_ms)
    }

    /// Playback paused. The current line stays on screen.
    pub fn on_paused(&mut self) {
        self.playing = false;
    }

    /// Playback stopped. Clears the display.
    pub fn on_stopped(&mut self) {
        self.playing = false;
        self.cursor.reset();
        self.shown = None;
    }

    /// Position jumped to `position_ms`.
    pub fn on_seek(&mut self, position_ms: u64) -> Option<LyricDisplay> {
        self.resync(position_ms)
    }

    /// The playlist ended. Shown whether or not lyrics are enabled.
    pub fn on_end_of_playlist(&mut self) -> Option<LyricDisplay> {
        self.on_stopped();
        self.publish(LyricDisplay::EndOfPlaylist)
    }

    /// Periodic poll. `None` reuses the last queried position.
    pub fn poll(&mut self, position_ms: Option<u64>) -> Option<LyricDisplay> {
        if !self.is_ticking() {
            return None;
        }
        let position_ms = position_ms.unwrap_or_else(|| self.cursor.last_queried_position_ms());
        if self.cursor.advance(&self.track.lines, position_ms) {
            debug!(target: LOG_TARGET, "Rescanned lyrics at {position_ms}ms");
        }
        self.publish(self.current_display())
    }

    /// Start of the lyric line before the current one.
    #[must_use]
    pub fn previous_line_position(&self, position_ms: u64) -> Option<u64> {
        let current = self.track.index_at(position_ms)?;
        let previous = current.checked_sub(1)?;
        self.track.line(previous).map(|line| line.timestamp_ms)
    }

    /// Start of the lyric line after the current one.
    #[must_use]
    pub fn next_line_position(&self, position_ms: u64) -> Option<u64> {
        let next = self.track.index_at(position_ms).map_or(0, |i| i + 1);
        self.track.line(next).map(|line| line.timestamp_ms)
    }

    fn resync(&mut self, position_ms: u64) -> Option<LyricDisplay> {
        self.cursor.reset();
        match self.state() {
            SyncState::Disabled => None,
            SyncState::Idle if self.playing => self.publish(LyricDisplay::Placeholder),
            SyncState::Idle => None,
            SyncState::Syncing => self.poll(Some(position_ms)),
        }
    }

    fn current_display(&self) -> LyricDisplay {
        self.cursor
            .line_index()
            .and_then(|index| {
                self.track.line(index).map(|line| LyricDisplay::Line {
                    index,
                    text: line.text.clone(),
                })
            })
            .unwrap_or(LyricDisplay::Placeholder)
    }

    fn publish(&mut self, display: LyricDisplay) -> Option<LyricDisplay> {
        if self.shown.as_ref() == Some(&display) {
            return None;
        }
        self.shown = Some(display.clone());
        Some(display)
    }
}
