//! Playback mode flags: repeat-one, shuffle and loop-playlist.
//!
//! Repeat suppresses shuffle; repeat or shuffle suppresses loop-playlist. A
//! suppressed flag reads `false`, its value is remembered, and it comes back
//! when its suppressor is cleared. Toggling a suppressed flag does nothing.

use crate::settings::{keys, Settings};
use serde::Serialize;
use tracing::debug;

/// The playback policy currently in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    None,
    Repeat,
    Shuffle,
    LoopPlaylist,
}

/// Mutually constrained mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModeFlags {
    repeat: bool,
    shuffle: bool,
    loop_playlist: bool,
    /// Shuffle value saved while repeat suppresses it
    previous_shuffle: bool,
    /// Loop value saved while repeat or shuffle suppresses it
    previous_loop: bool,
}

impl ModeFlags {
    #[must_use]
    pub const fn repeat(&self) -> bool {
        self.repeat
    }

    #[must_use]
    pub const fn shuffle(&self) -> bool {
        self.shuffle
    }

    #[must_use]
    pub const fn loop_playlist(&self) -> bool {
        self.loop_playlist
    }

    /// Shuffle cannot be toggled while repeat is on
    #[must_use]
    pub const fn shuffle_suppressed(&self) -> bool {
        self.repeat
    }

    /// Loop-playlist cannot be toggled while repeat or shuffle is on
    #[must_use]
    pub const fn loop_suppressed(&self) -> bool {
        self.repeat || self.shuffle
    }

    #[must_use]
    pub const fn active(&self) -> PlaybackMode {
        if self.repeat {
            PlaybackMode::Repeat
        } else if self.shuffle {
            PlaybackMode::Shuffle
        } else if self.loop_playlist {
            PlaybackMode::LoopPlaylist
        } else {
            PlaybackMode::None
        }
    }

    /// Flip repeat and re-evaluate suppression of the other two flags.
    pub fn toggle_repeat(&mut self) -> bool {
        let before = *self;
        self.repeat = !self.repeat;
        self.reconcile(before);
        true
    }

    /// Flip shuffle. Returns `false` (and changes nothing) while repeat is on.
    pub fn toggle_shuffle(&mut self) -> bool {
        if self.shuffle_suppressed() {
            return false;
        }
        let before = *self;
        self.shuffle = !self.shuffle;
        self.reconcile(before);
        true
    }

    /// Flip loop-playlist. Returns `false` (and changes nothing) while suppressed.
    pub fn toggle_loop_playlist(&mut self) -> bool {
        if self.loop_suppressed() {
            return false;
        }
        self.loop_playlist = !self.loop_playlist;
        true
    }

    /// Save or restore suppressed flags after a change from `before`.
    ///
    /// The remembered value is captured only on entry into suppression so a
    /// second suppressor cannot overwrite it.
    fn reconcile(&mut self, before: Self) {
        if self.repeat && !before.repeat {
            self.previous_shuffle = self.shuffle;
            self.shuffle = false;
        } else if !self.repeat && before.repeat {
            self.shuffle = self.previous_shuffle;
            self.previous_shuffle = false;
        }

        let was_suppressed = before.loop_suppressed();
        let is_suppressed = self.loop_suppressed();
        if is_suppressed && !was_suppressed {
            self.previous_loop = self.loop_playlist;
            self.loop_playlist = false;
        } else if !is_suppressed && was_suppressed {
            self.loop_playlist = self.previous_loop;
            self.previous_loop = false;
        }
    }

    /// Load persisted flags, repairing combinations that break the invariant.
    #[must_use]
    pub fn restore(settings: &Settings) -> Self {
        let previous_shuffle = settings.bool(keys::PREVIOUS_SHUFFLE).or_else(|| {
            let legacy = settings.bool(keys::LEGACY_PREVIOUS_SHUFFLE);
            if legacy.is_some() {
                debug!("Reading shuffle state from legacy key {}", keys::LEGACY_PREVIOUS_SHUFFLE);
            }
            legacy
        });

        let mut flags = Self {
            repeat: settings.bool(keys::REPEAT).unwrap_or(false),
            shuffle: settings.bool(keys::SHUFFLE).unwrap_or(false),
            loop_playlist: settings.bool(keys::LOOP).unwrap_or(false),
            previous_shuffle: previous_shuffle.unwrap_or(false),
            previous_loop: settings.bool(keys::PREVIOUS_LOOP).unwrap_or(false),
        };

        if flags.repeat && flags.shuffle {
            flags.previous_shuffle = true;
            flags.shuffle = false;
        }
        if flags.loop_suppressed() && flags.loop_playlist {
            flags.previous_loop = true;
            flags.loop_playlist = false;
        }
        flags
    }

    /// Persist all five flags. Failures are logged, not returned.
    pub fn save(&self, settings: &Settings) {
        settings.persist(keys::PREVIOUS_LOOP, self.previous_loop);
        settings.persist(keys::PREVIOUS_SHUFFLE, self.previous_shuffle);
        settings.persist(keys::SHUFFLE, self.shuffle);
        settings.persist(keys::LOOP, self.loop_playlist);
        settings.persist(keys::REPEAT, self.repeat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(flags: &ModeFlags) {
        assert!(!(flags.repeat() && flags.shuffle()), "{flags:?}");
        if flags.repeat() || flags.shuffle() {
            assert!(!flags.loop_playlist(), "{flags:?}");
        }
    }

    #[test]
    fn test_defaults() {
        let flags = ModeFlags::default();
        assert_eq!(flags.active(), PlaybackMode::None);
        assert!(!flags.shuffle_suppressed());
        assert!(!flags.loop_suppressed());
    }

    #[test]
    fn test_repeat_suppresses_and_restores_loop() {
        let mut flags = ModeFlags::default();
        flags.toggle_loop_playlist();
        assert_eq!(flags.active(), PlaybackMode::LoopPlaylist);

        flags.toggle_repeat();
        assert!(flags.repeat());
        assert!(!flags.loop_playlist());
        assert_eq!(flags.active(), PlaybackMode::Repeat);

        flags.toggle_repeat();
        assert!(flags.loop_playlist());
    }

    #[test]
    fn test_repeat_suppresses_and_restores_shuffle() {
        let mut flags = ModeFlags::default();
        flags.toggle_shuffle();
        flags.toggle_repeat();
        assert!(!flags.shuffle());
        assert!(flags.repeat());

        flags.toggle_repeat();
        assert!(flags.shuffle());
    }

    #[test]
    fn test_stacked_suppressors_keep_original_loop_value() {
        let mut flags = ModeFlags::default();
        flags.toggle_loop_playlist(); // loop on
        flags.toggle_shuffle(); // loop suppressed by shuffle
        flags.toggle_repeat(); // shuffle suppressed too
        assert!(!flags.loop_playlist());

        flags.toggle_repeat(); // shuffle back, loop still suppressed
        assert!(flags.shuffle());
        assert!(!flags.loop_playlist());

        flags.toggle_shuffle(); // both cleared
        assert!(flags.loop_playlist());
    }

    #[test]
    fn test_suppressed_toggles_are_noops() {
        let mut flags = ModeFlags::default();
        flags.toggle_repeat();
        let snapshot = flags;

        assert!(!flags.toggle_shuffle());
        assert!(!flags.toggle_loop_playlist());
        assert_eq!(flags, snapshot);
    }

    /// Walk every toggle sequence up to length 7 against a reference model
    #[test]
    fn test_all_sequences_hold_invariant() {
        const LEN: u32 = 7;
        for seq in 0..3_u32.pow(LEN) {
            let mut flags = ModeFlags::default();
            // Loop value the user chose before the current suppression began
            let mut loop_choice = false;
            let mut code = seq;
            for _ in 0..LEN {
                let was_suppressed = flags.loop_suppressed();
                match code % 3 {
                    0 => {
                        flags.toggle_repeat();
                    }
                    1 => {
                        flags.toggle_shuffle();
                    }
                    _ => {
                        if flags.toggle_loop_playlist() {
                            loop_choice = flags.loop_playlist();
                        }
                    }
                }
                code /= 3;

                assert_invariant(&flags);
                if was_suppressed && !flags.loop_suppressed() {
                    assert_eq!(flags.loop_playlist(), loop_choice, "sequence {seq}");
                }
            }
        }
    }

    #[test]
    fn test_save_and_restore() {
        let settings = Settings::in_memory();
        let mut flags = ModeFlags::default();
        flags.toggle_loop_playlist();
        flags.toggle_shuffle();
        flags.save(&settings);

        assert_eq!(settings.bool(keys::SHUFFLE), Some(true));
        assert_eq!(settings.bool(keys::LOOP), Some(false));
        assert_eq!(settings.bool(keys::PREVIOUS_LOOP), Some(true));

        let restored = ModeFlags::restore(&settings);
        assert_eq!(restored, flags);
    }

    #[test]
    fn test_restore_reads_legacy_shuffle_key() {
        let settings = Settings::in_memory();
        settings.set(keys::REPEAT, true).unwrap();
        settings.set(keys::LEGACY_PREVIOUS_SHUFFLE, true).unwrap();

        let mut flags = ModeFlags::restore(&settings);
        assert!(flags.repeat());
        assert!(!flags.shuffle());

        flags.toggle_repeat();
        assert!(flags.shuffle());

        flags.save(&settings);
        assert!(settings.get(keys::PREVIOUS_SHUFFLE).is_some());
    }

    #[test]
    fn test_restore_repairs_conflicting_flags() {
        let settings = Settings::in_memory();
        settings.set(keys::REPEAT, true).unwrap();
        settings.set(keys::SHUFFLE, true).unwrap();
        settings.set(keys::LOOP, true).unwrap();

        let mut flags = ModeFlags::restore(&settings);
        assert_invariant(&flags);
        assert_eq!(flags.active(), PlaybackMode::Repeat);

        flags.toggle_repeat();
        assert!(flags.shuffle());
        flags.toggle_shuffle();
        assert!(flags.loop_playlist());
    }
}
