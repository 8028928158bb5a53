//! Playlist navigation: which track plays next.
//!
//! The controller decides *whether* to move on when a track ends; the
//! navigator decides *where* to. [`Playlist`] is the built-in implementation
//! over an ordered list of files, with a [`RandomPlaybackQueue`] for shuffle.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOG_TARGET: &str = "april::navigator";

/// How to pick the track after the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Playlist order. `wrap` returns to the first track after the last.
    Sequential { wrap: bool },
    /// Random queue order. `wrap` returns to the head of the queue.
    Random { wrap: bool },
}

/// Result of a navigation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavStep {
    Track(PathBuf),
    EndOfPlaylist,
    /// The playlist has no tracks
    Empty,
}

/// Chooses tracks for the player. Only called from the player task.
pub trait PlaylistNavigator: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Option<&Path>;

    /// Make `path` the current track, returning `false` if it is not listed.
    fn select(&mut self, path: &Path) -> bool;

    fn next(&mut self, advance: Advance) -> NavStep;

    /// Step back. User-initiated, so it always wraps.
    fn previous(&mut self, random: bool) -> NavStep;

    /// Reshuffle the random queue with the current track at its head.
    fn rebuild_random_queue(&mut self);

    /// Start over after the end of the playlist was reached.
    fn restart(&mut self, random: bool) -> NavStep;
}

/// Track indices in shuffled order, the current track pinned at the head
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomPlaybackQueue {
    order: Vec<usize>,
    position: usize,
}

impl RandomPlaybackQueue {
    /// Shuffle `0..len`, then move `pinned` to the front.
    pub fn build<R: rand::Rng + ?Sized>(len: usize, pinned: Option<usize>, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(rng);
        if let Some(pinned) = pinned {
            if let Some(at) = order.iter().position(|&i| i == pinned) {
                order.remove(at);
                order.insert(0, pinned);
            }
        }
        Self { order, position: 0 }
    }

    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[must_use]
    pub fn current(&self) -> Option<usize> {
        self.order.get(self.position).copied()
    }

    /// Move forward one entry. Past the end this wraps if `wrap`, otherwise
    /// returns `None` and stays put.
    pub fn advance(&mut self, wrap: bool) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        if self.position + 1 < self.order.len() {
            self.position += 1;
        } else if wrap {
            self.position = 0;
        } else {
            return None;
        }
        self.current()
    }

    /// Move back one entry, wrapping to the tail.
    pub fn retreat(&mut self) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        self.position = self
            .position
            .checked_sub(1)
            .unwrap_or(self.order.len() - 1);
        self.current()
    }

    /// Point at `track` if it is queued.
    pub fn seek_to(&mut self, track: usize) {
        if let Some(at) = self.order.iter().position(|&i| i == track) {
            self.position = at;
        }
    }
}

/// An ordered list of media files with a current position
#[derive(Debug)]
pub struct Playlist {
    tracks: Vec<PathBuf>,
    current: Option<usize>,
    random: RandomPlaybackQueue,
    rng: StdRng,
}

impl Playlist {
    #[must_use]
    pub fn new(tracks: Vec<PathBuf>) -> Self {
        Self::with_rng(tracks, StdRng::from_entropy())
    }

    /// Playlist with a reproducible shuffle order
    #[must_use]
    pub fn with_seed(tracks: Vec<PathBuf>, seed: u64) -> Self {
        Self::with_rng(tracks, StdRng::seed_from_u64(seed))
    }

    fn with_rng(tracks: Vec<PathBuf>, mut rng: StdRng) -> Self {
        let random = RandomPlaybackQueue::build(tracks.len(), None, &mut rng);
        Self {
            tracks,
            current: None,
            random,
            rng,
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    #[must_use]
    pub const fn current_index(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub const fn random_queue(&self) -> &RandomPlaybackQueue {
        &self.random
    }

    fn step_to(&mut self, index: Option<usize>) -> NavStep {
        match index.and_then(|i| self.tracks.get(i).map(|p| (i, p.clone()))) {
            Some((i, path)) => {
                self.current = Some(i);
                NavStep::Track(path)
            }
            None => NavStep::EndOfPlaylist,
        }
    }
}

impl PlaylistNavigator for Playlist {
    fn len(&self) -> usize {
        self.tracks.len()
    }

    fn current(&self) -> Option<&Path> {
        self.current
            .and_then(|i| self.tracks.get(i))
            .map(PathBuf::as_path)
    }

    fn select(&mut self, path: &Path) -> bool {
        let Some(index) = self.tracks.iter().position(|p| p == path) else {
            return false;
        };
        self.current = Some(index);
        self.random.seek_to(index);
        true
    }

    fn next(&mut self, advance: Advance) -> NavStep {
        if self.tracks.is_empty() {
            return NavStep::Empty;
        }
        let index = match advance {
            Advance::Sequential { wrap } => match self.current {
                None => Some(0),
                Some(i) if i + 1 < self.tracks.len() => Some(i + 1),
                Some(_) if wrap => Some(0),
                Some(_) => None,
            },
            Advance::Random { wrap } => self.random.advance(wrap),
        };
        let step = self.step_to(index);
        debug!(target: LOG_TARGET, "{advance:?} -> {step:?}");
        step
    }

    fn previous(&mut self, random: bool) -> NavStep {
        if self.tracks.is_empty() {
            return NavStep::Empty;
        }
        let index = if random {
            self.random.retreat()
        } else {
            let last = self.tracks.len() - 1;
            Some(self.current.map_or(last, |i| i.checked_sub(1).unwrap_or(last)))
        };
        self.step_to(index)
    }

    fn rebuild_random_queue(&mut self) {
        self.random = RandomPlaybackQueue::build(self.tracks.len(), self.current, &mut self.rng);
        debug!(target: LOG_TARGET, "Rebuilt random queue of {} tracks", self.tracks.len());
    }

    fn restart(&mut self, random: bool) -> NavStep {
        if self.tracks.is_empty() {
            return NavStep::Empty;
        }
        if random {
            self.random = RandomPlaybackQueue::build(self.tracks.len(), None, &mut self.rng);
            let head = self.random.current();
            self.step_to(head)
        } else {
            self.step_to(Some(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/music/{i}.mp3"))).collect()
    }

    fn track(i: usize) -> NavStep {
        NavStep::Track(PathBuf::from(format!("/music/{i}.mp3")))
    }

    #[test]
    fn test_random_queue_pins_current() {
        let mut rng = StdRng::seed_from_u64(7);
        for pinned in 0..5 {
            let queue = RandomPlaybackQueue::build(5, Some(pinned), &mut rng);
            assert_eq!(queue.current(), Some(pinned));
            let mut sorted = queue.order().to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_random_queue_wrapping() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut queue = RandomPlaybackQueue::build(3, None, &mut rng);
        let head = queue.current();

        queue.advance(false);
        queue.advance(false);
        assert_eq!(queue.advance(false), None);
        assert_eq!(queue.advance(true), head);
        assert_eq!(queue.retreat(), queue.order().last().copied());
    }

    #[test]
    fn test_sequential_auto_advance() {
        let mut playlist = Playlist::with_seed(paths(3), 0);
        assert!(playlist.select(Path::new("/music/1.mp3")));

        assert_eq!(playlist.next(Advance::Sequential { wrap: false }), track(2));
        assert_eq!(
            playlist.next(Advance::Sequential { wrap: false }),
            NavStep::EndOfPlaylist
        );
        assert_eq!(playlist.current(), Some(Path::new("/music/2.mp3")));
        assert_eq!(playlist.next(Advance::Sequential { wrap: true }), track(0));
    }

    #[test]
    fn test_previous_wraps() {
        let mut playlist = Playlist::with_seed(paths(3), 0);
        playlist.select(Path::new("/music/0.mp3"));
        assert_eq!(playlist.previous(false), track(2));
        assert_eq!(playlist.previous(false), track(1));
    }

    #[test]
    fn test_random_advance_visits_every_track_once() {
        let mut playlist = Playlist::with_seed(paths(6), 42);
        playlist.select(Path::new("/music/3.mp3"));
        playlist.rebuild_random_queue();

        let mut seen = vec![3];
        loop {
            match playlist.next(Advance::Random { wrap: false }) {
                NavStep::Track(path) => {
                    let i = playlist.tracks().iter().position(|p| *p == path).unwrap();
                    seen.push(i);
                }
                NavStep::EndOfPlaylist => break,
                NavStep::Empty => unreachable!(),
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_restart() {
        let mut playlist = Playlist::with_seed(paths(4), 3);
        playlist.select(Path::new("/music/3.mp3"));
        assert_eq!(playlist.restart(false), track(0));

        let step = playlist.restart(true);
        let pinned = playlist
            .random_queue()
            .current()
            .map(|i| NavStep::Track(playlist.tracks()[i].clone()));
        assert_eq!(pinned, Some(step));
    }

    #[test]
    fn test_empty_playlist() {
        let mut playlist = Playlist::new(Vec::new());
        assert!(playlist.is_empty());
        assert_eq!(playlist.next(Advance::Random { wrap: true }), NavStep::Empty);
        assert_eq!(playlist.previous(false), NavStep::Empty);
        assert_eq!(playlist.restart(true), NavStep::Empty);
        assert!(!playlist.select(Path::new("/music/0.mp3")));
    }
}
