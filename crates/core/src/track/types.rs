//! Types for the track module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Audio container/codec family of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Not recognized. Never transcoded.
    #[default]
    Unknown,
    /// MPEG audio (MP3).
    Mpeg,
    /// Advanced Audio Coding (usually in an MPEG-4 container).
    Aac,
    /// Audio Interchange File Format.
    Aiff,
    /// WAVE (RIFF PCM).
    Wav,
}

impl TrackKind {
    /// Kinds the transcoders accept as input.
    pub const SUPPORTED: [TrackKind; 4] = [Self::Mpeg, Self::Aac, Self::Aiff, Self::Wav];

    /// Whether sources of this kind can be transcoded.
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Mpeg | Self::Aac | Self::Aiff | Self::Wav => true,
            Self::Unknown => false,
        }
    }

    /// Infers the kind from a file extension (case-insensitive).
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "mp3" => Self::Mpeg,
            "m4a" | "m4b" | "aac" | "mp4" => Self::Aac,
            "aif" | "aiff" | "aifc" => Self::Aiff,
            "wav" | "wave" => Self::Wav,
            _ => Self::Unknown,
        }
    }

    /// Infers the kind from the extension of a path.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Mpeg => "mpeg",
            Self::Aac => "aac",
            Self::Aiff => "aiff",
            Self::Wav => "wav",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata identifying one source audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Stable unique identity (e.g. the library's persistent id).
    pub id: String,
    /// Source file path.
    pub path: PathBuf,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Display album.
    #[serde(default)]
    pub album: String,
    /// Display artist.
    #[serde(default)]
    pub artist: String,
    /// Duration in seconds.
    #[serde(default)]
    pub duration_secs: f64,
    /// Audio kind of the source.
    #[serde(default)]
    pub kind: TrackKind,
    /// Source size in bytes.
    #[serde(default)]
    pub size_bytes: u64,
}

impl TrackDescriptor {
    /// Creates a descriptor with the kind inferred from the path extension.
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            kind: TrackKind::from_path(&path),
            path,
            title: String::new(),
            album: String::new(),
            artist: String::new(),
            duration_secs: 0.0,
            size_bytes: 0,
        }
    }

    /// Sets the display title, artist and album.
    pub fn with_display(
        mut self,
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        self.title = title.into();
        self.artist = artist.into();
        self.album = album.into();
        self
    }

    /// Sets the duration in seconds.
    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Overrides the inferred kind.
    pub fn with_kind(mut self, kind: TrackKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the source size in bytes.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Returns a name suitable for log lines: the title, or the file name.
    pub fn display_name(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(TrackKind::from_extension("mp3"), TrackKind::Mpeg);
        assert_eq!(TrackKind::from_extension("M4A"), TrackKind::Aac);
        assert_eq!(TrackKind::from_extension("aiff"), TrackKind::Aiff);
        assert_eq!(TrackKind::from_extension("aif"), TrackKind::Aiff);
        assert_eq!(TrackKind::from_extension("wav"), TrackKind::Wav);
        assert_eq!(TrackKind::from_extension("flac"), TrackKind::Unknown);
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(
            TrackKind::from_path(Path::new("/music/song.MP3")),
            TrackKind::Mpeg
        );
        assert_eq!(
            TrackKind::from_path(Path::new("/music/no_extension")),
            TrackKind::Unknown
        );
    }

    #[test]
    fn test_supported_kinds() {
        for kind in TrackKind::SUPPORTED {
            assert!(kind.is_supported());
        }
        assert!(!TrackKind::Unknown.is_supported());
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let json = r#"{"id": "A1", "path": "/music/a.wav"}"#;
        let track: TrackDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, "A1");
        assert_eq!(track.kind, TrackKind::Unknown);
        assert_eq!(track.duration_secs, 0.0);
        assert!(track.title.is_empty());
    }

    #[test]
    fn test_display_name_falls_back_to_file_name() {
        let track = TrackDescriptor::new("A1", "/music/a.wav");
        assert_eq!(track.display_name(), "a.wav");

        let titled = track.with_display("Song", "Artist", "Album");
        assert_eq!(titled.display_name(), "Song");
    }
}
