//! Media container formats and the tag-reading capability.
//!
//! Tag and artwork extraction is not implemented here. The player only needs
//! to know which container a file is, and optionally asks a
//! [`MetadataSource`] supplied by the embedding application for display data.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Audio container formats the player recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    Mp3,
    /// MPEG-4 audio (`.m4a` / `.mp4`)
    M4a,
    Ogg,
    Flac,
    Wav,
}

impl ContainerFormat {
    pub const ALL: [Self; 5] = [Self::Mp3, Self::M4a, Self::Ogg, Self::Flac, Self::Wav];

    /// Canonical file extension, lowercase and without the dot.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }

    /// Match a file extension, ignoring case.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "m4a" | "mp4" => Some(Self::M4a),
            "ogg" | "oga" => Some(Self::Ogg),
            "flac" => Some(Self::Flac),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display metadata for a track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
    pub duration_ms: Option<u64>,
    pub format: Option<ContainerFormat>,
}

/// Capability for reading tags from a media file.
///
/// Implementations typically branch on [`ContainerFormat`] (ID3 for mp3,
/// atoms for m4a, Vorbis comments for ogg/flac, RIFF info for wav).
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Returns a human-readable name for this source.
    fn name(&self) -> &'static str;

    /// Whether this source can read `format`.
    fn supports(&self, format: ContainerFormat) -> bool {
        let _ = format;
        true
    }

    /// Read display metadata from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its tags are corrupt.
    async fn read(&self, path: &Path, format: ContainerFormat) -> Result<TrackMetadata>;
}
