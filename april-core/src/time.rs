//! Time, position and timestamp conversion utilities.
//!
//! Playback positions travel through the core as whole milliseconds (`u64`).
//! These helpers convert to and from the other representations the player
//! needs, saturating instead of truncating.

use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Milliseconds to fractional seconds, for the seconds-based getters.
#[must_use]
pub fn millis_to_secs(ms: u64) -> f64 {
    Duration::from_millis(ms).as_secs_f64()
}

/// Fractional seconds to whole milliseconds.
///
/// Returns `None` for negative, NaN or infinite input.
#[must_use]
pub fn secs_to_millis(secs: f64) -> Option<u64> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .map(|d| d.as_millis_u64())
}

/// Format whole seconds as `mm:ss`. Minutes are not wrapped into hours.
#[must_use]
pub fn format_clock(secs: u64) -> String {
    let minutes = secs / 60;
    let seconds = secs % 60;
    format!("{minutes:02}:{seconds:02}")
}

/// Progress label shown next to the seek bar: `[mm:ss/mm:ss]`.
#[must_use]
pub fn format_progress(position_ms: u64, duration_ms: u64) -> String {
    format!(
        "[{}/{}]",
        format_clock(position_ms / 1000),
        format_clock(duration_ms / 1000)
    )
}
