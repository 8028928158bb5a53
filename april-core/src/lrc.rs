use crate::error::Result;
use crate::metadata::ContainerFormat;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Parsed lyric document: metadata plus timestamp-sorted lines
#[derive(Debug, Clone, Default)]
pub struct LyricTrack {
    pub metadata: LrcMetadata,
    pub lines: Vec<LyricLine>,
    /// Lines that were skipped while parsing
    pub warnings: Vec<LyricParseWarning>,
}

/// LRC metadata from ID tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LrcMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub author: Option<String>,
    pub length_ms: Option<u64>,
    pub offset_ms: i64, // can be negative
}

/// A single line of lyrics with its start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub timestamp_ms: u64,
    pub text: String,
}

impl LyricLine {
    #[must_use]
    pub fn new(timestamp_ms: u64, text: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            text: text.into(),
        }
    }
}

/// A document line that could not be turned into a lyric entry.
///
/// Skipped lines never abort parsing; they are collected so callers can log them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lyric line {line_number} skipped ({issue}): {content:?}")]
pub struct LyricParseWarning {
    /// 1-based line number in the source document
    pub line_number: usize,
    pub content: String,
    pub issue: ParseIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseIssue {
    /// A bracketed prefix that is neither an ID tag nor a valid timestamp
    MalformedTimestamp,
    /// Text with no leading timestamp at all
    MissingTimestamp,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MalformedTimestamp => "malformed timestamp",
            Self::MissingTimestamp => "missing timestamp",
        })
    }
}

impl LyricTrack {
    /// Parse an LRC document. Never fails: bad lines are skipped and recorded
    /// in [`LyricTrack::warnings`].
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut metadata = LrcMetadata::default();
        let mut lines = Vec::new();
        let mut warnings = Vec::new();

        for (number, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            // Try to parse as ID tag first
            if let Some((tag, value)) = parse_id_tag(line) {
                match tag.to_ascii_lowercase().as_str() {
                    "ti" => metadata.title = Some(value),
                    "ar" => metadata.artist = Some(value),
                    "al" => metadata.album = Some(value),
                    "au" => metadata.author = Some(value),
                    "length" => metadata.length_ms = parse_timestamp(&value),
                    "offset" => {
                        if let Ok(offset) = value.trim_start_matches('+').parse::<i64>() {
                            metadata.offset_ms = offset;
                        }
                    }
                    _ => {} // by:, re:, ve: and friends carry nothing we use
                }
                continue;
            }

            match parse_lyric_line(line) {
                Ok(parsed) => lines.extend(parsed),
                Err(issue) => warnings.push(LyricParseWarning {
                    line_number: number + 1,
                    content: line.to_string(),
                    issue,
                }),
            }
        }

        if metadata.offset_ms != 0 {
            for line in &mut lines {
                line.timestamp_ms = apply_offset(line.timestamp_ms, metadata.offset_ms);
            }
        }

        // Stable sort keeps document order for identical timestamps
        lines.sort_by_key(|l| l.timestamp_ms);

        Self {
            metadata,
            lines,
            warnings,
        }
    }

    /// Read and parse a lyric file. Invalid UTF-8 is replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let track = Self::parse(&String::from_utf8_lossy(&bytes));

        for warning in &track.warnings {
            debug!("{}: {}", path.display(), warning);
        }
        if !track.warnings.is_empty() {
            warn!(
                "Skipped {} malformed line(s) in {} ({} usable)",
                track.warnings.len(),
                path.display(),
                track.lines.len()
            );
        }

        Ok(track)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn line(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    /// Index of the last line starting at or before `position_ms`.
    ///
    /// Binary search over the sorted lines; `None` before the first line.
    #[must_use]
    pub fn index_at(&self, position_ms: u64) -> Option<usize> {
        self.lines
            .partition_point(|line| line.timestamp_ms <= position_ms)
            .checked_sub(1)
    }
}

/// Path of the `.lrc` file that accompanies a media file, if the media file
/// is a recognized container format.
#[must_use]
pub fn companion_path(track: &Path) -> Option<PathBuf> {
    ContainerFormat::from_path(track)?;
    Some(track.with_extension("lrc"))
}

/// Locate an existing companion lyric file for `track`.
pub async fn find_companion(track: &Path) -> Option<PathBuf> {
    let candidate = companion_path(track)?;
    match tokio::fs::try_exists(&candidate).await {
        Ok(true) => Some(candidate),
        _ => None,
    }
}

/// Parse an ID tag like [ti:Title] or [offset:+250]
fn parse_id_tag(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let content = &rest[..end];
    let (tag, value) = content.split_once(':')?;

    // Timestamps start with digits; tags are words
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    Some((tag.to_string(), value.trim().to_string()))
}

/// Parse a lyric line like [00:12.34]Hello world or [00:12.34][00:15.67]Same lyrics
fn parse_lyric_line(line: &str) -> std::result::Result<Vec<LyricLine>, ParseIssue> {
    if !line.starts_with('[') {
        return Err(ParseIssue::MissingTimestamp);
    }

    let mut remaining = line;
    let mut timestamps = Vec::new();

    // Extract all timestamps at the beginning
    while let Some(rest) = remaining.strip_prefix('[') {
        let Some(end) = rest.find(']') else {
            break;
        };
        let Some(timestamp) = parse_timestamp(&rest[..end]) else {
            break;
        };
        timestamps.push(timestamp);
        remaining = &rest[end + 1..];
    }

    if timestamps.is_empty() {
        return Err(ParseIssue::MalformedTimestamp);
    }

    let text = remaining.trim();

    // Create a line for each timestamp (handles multi-timestamp lines)
    Ok(timestamps
        .into_iter()
        .map(|timestamp_ms| LyricLine::new(timestamp_ms, text))
        .collect())
}

/// Parse a timestamp body: `mm:ss.xx`, `mm:ss.xxx`, `mm:ss:xx` or `mm:ss`
fn parse_timestamp(s: &str) -> Option<u64> {
    let s = s.trim();
    let mut parts = s.split(':');
    let minutes = parse_digits(parts.next()?)?;
    let seconds_part = parts.next()?;
    let hundredths = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let (seconds, fraction_ms) = match (seconds_part.split_once('.'), hundredths) {
        (Some((secs, frac)), None) => (parse_digits(secs)?, parse_fraction(frac)?),
        (None, Some(frac)) => (parse_digits(seconds_part)?, parse_fraction(frac)?),
        (None, None) => (parse_digits(seconds_part)?, 0),
        (Some(_), Some(_)) => return None,
    };

    minutes
        .checked_mul(60_000)?
        .checked_add(seconds.checked_mul(1000)?)?
        .checked_add(fraction_ms)
}

/// Digits only; rejects signs and whitespace that `str::parse` would accept
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Fractional-second digits to milliseconds: "5" -> 500, "34" -> 340, "345" -> 345
fn parse_fraction(s: &str) -> Option<u64> {
    let value = parse_digits(s)?;
    match s.len() {
        1 => Some(value * 100),
        2 => Some(value * 10),
        3 => Some(value),
        _ => None,
    }
}

/// Apply a millisecond offset to a timestamp (can be negative)
fn apply_offset(timestamp_ms: u64, offset_ms: i64) -> u64 {
    if offset_ms >= 0 {
        timestamp_ms.saturating_add(offset_ms.unsigned_abs())
    } else {
        timestamp_ms.saturating_sub(offset_ms.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_lrc() {
        let result = LyricTrack::parse("[00:12.34]Hello world");
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].timestamp_ms, 12_340);
        assert_eq!(result.lines[0].text, "Hello world");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_parse_multiple_lines() {
        let input = r"
[00:05.00]First line
[00:10.00]Second line
[00:15.00]Third line
";
        let result = LyricTrack::parse(input);
        assert_eq!(result.len(), 3);
        assert_eq!(result.lines[0].text, "First line");
        assert_eq!(result.lines[1].text, "Second line");
        assert_eq!(result.lines[2].text, "Third line");
    }

    #[test]
    fn test_unsorted_entries_are_sorted() {
        let input = "[00:09.00]c\n[00:01.00]a\n[00:05.00]b";
        let result = LyricTrack::parse(input);
        let stamps: Vec<_> = result.lines.iter().map(|l| l.timestamp_ms).collect();
        assert_eq!(stamps, vec![1000, 5000, 9000]);
        assert_eq!(result.lines[0].text, "a");
    }

    #[test]
    fn test_parse_id_tags() {
        let input = r"
[ti:Song Title]
[ar:Artist Name]
[al:Album Name]
[length:03:25.50]
[00:05.00]Lyrics here
";
        let result = LyricTrack::parse(input);
        assert_eq!(result.metadata.title, Some("Song Title".to_string()));
        assert_eq!(result.metadata.artist, Some("Artist Name".to_string()));
        assert_eq!(result.metadata.album, Some("Album Name".to_string()));
        assert_eq!(result.metadata.length_ms, Some(205_500));
        assert_eq!(result.len(), 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_parse_offset() {
        let result = LyricTrack::parse("[offset:500]\n[00:10.00]Test");
        // 10.00s + 0.5s offset = 10.5s
        assert_eq!(result.lines[0].timestamp_ms, 10_500);
    }

    #[test]
    fn test_parse_negative_offset() {
        let result = LyricTrack::parse("[offset:-500]\n[00:10.00]Test");
        assert_eq!(result.lines[0].timestamp_ms, 9_500);
    }

    #[test]
    fn test_negative_offset_saturates_at_zero() {
        let result = LyricTrack::parse("[offset:-5000]\n[00:01.00]Early");
        assert_eq!(result.lines[0].timestamp_ms, 0);
    }

    #[test]
    fn test_parse_cjk_lyrics() {
        let result = LyricTrack::parse("[00:05.00]你好世界");
        assert_eq!(result.lines[0].text, "你好世界");
    }

    #[test]
    fn test_parse_multi_timestamp_line() {
        let result = LyricTrack::parse("[00:05.00][00:15.00]Repeated lyric");
        assert_eq!(result.len(), 2);
        assert_eq!(result.lines[0].text, "Repeated lyric");
        assert_eq!(result.lines[1].text, "Repeated lyric");
        assert_eq!(result.lines[0].timestamp_ms, 5000);
        assert_eq!(result.lines[1].timestamp_ms, 15_000);
    }

    #[test]
    fn test_alternative_timestamp_formats() {
        // mm:ss:xx uses a colon before the hundredths
        assert_eq!(LyricTrack::parse("[00:12:34]a").lines[0].timestamp_ms, 12_340);
        assert_eq!(LyricTrack::parse("[01:02]b").lines[0].timestamp_ms, 62_000);
        assert_eq!(LyricTrack::parse("[00:01.5]c").lines[0].timestamp_ms, 1_500);
        assert_eq!(LyricTrack::parse("[00:01.234]d").lines[0].timestamp_ms, 1_234);
    }

    #[test]
    fn test_empty_text_line_is_kept() {
        let result = LyricTrack::parse("[00:07.00]");
        assert_eq!(result.len(), 1);
        assert_eq!(result.lines[0].text, "");
    }

    #[test]
    fn test_malformed_lines_are_skipped_with_warnings() {
        let input = r"
[00:01.00]good
[0a:12.34]bad minutes
[00:xx.00]bad seconds
plain text without timestamp
[00:03.00]also good
";
        let result = LyricTrack::parse(input);
        assert_eq!(result.len(), 2);
        assert_eq!(result.warnings.len(), 3);
        assert_eq!(result.warnings[0].issue, ParseIssue::MalformedTimestamp);
        assert_eq!(result.warnings[0].line_number, 3);
        assert_eq!(result.warnings[2].issue, ParseIssue::MissingTimestamp);
        assert!(result.warnings[2].to_string().contains("missing timestamp"));
    }

    #[test]
    fn test_all_malformed_yields_empty_track() {
        let result = LyricTrack::parse("nothing\n[1:2:3:4]x\n[12:x]oops");
        assert!(result.is_empty());
        assert_eq!(result.warnings.len(), 3);
    }

    #[test]
    fn test_empty_lines_ignored() {
        let result = LyricTrack::parse("\n[00:05.00]First\n\n[00:10.00]Second\n\n");
        assert_eq!(result.len(), 2);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_index_at() {
        let track = LyricTrack::parse("[00:01.00]a\n[00:05.00]b\n[00:09.00]c");
        assert_eq!(track.index_at(0), None);
        assert_eq!(track.index_at(999), None);
        assert_eq!(track.index_at(1000), Some(0));
        assert_eq!(track.index_at(4999), Some(0));
        assert_eq!(track.index_at(5000), Some(1));
        assert_eq!(track.index_at(60_000), Some(2));
        assert_eq!(LyricTrack::default().index_at(10), None);
    }

    #[test]
    fn test_companion_path() {
        assert_eq!(
            companion_path(Path::new("/music/song.mp3")),
            Some(PathBuf::from("/music/song.lrc"))
        );
        assert_eq!(
            companion_path(Path::new("/music/song.OGG")),
            Some(PathBuf::from("/music/song.lrc"))
        );
        assert_eq!(companion_path(Path::new("/music/notes.txt")), None);
    }

    #[tokio::test]
    async fn test_load_and_find_companion() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.flac");
        std::fs::write(&song, b"").unwrap();

        assert!(find_companion(&song).await.is_none());

        let lrc = dir.path().join("song.lrc");
        std::fs::write(&lrc, "[00:01.00]one\nbroken\n").unwrap();

        let found = find_companion(&song).await.unwrap();
        assert_eq!(found, lrc);

        let track = LyricTrack::load(&found).await.unwrap();
        assert_eq!(track.len(), 1);
        assert_eq!(track.warnings.len(), 1);
    }
}
