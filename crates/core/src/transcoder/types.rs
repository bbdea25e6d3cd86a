//! Types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use super::error::TranscodeError;
use crate::track::{TrackDescriptor, TrackKind};

/// MP3 bit-rate setting applied to every track of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityProfile {
    /// Encoder default.
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "cbr_64")]
    Cbr64,
    #[serde(rename = "cbr_96")]
    Cbr96,
    #[serde(rename = "cbr_128")]
    Cbr128,
    #[serde(rename = "cbr_160")]
    Cbr160,
    #[serde(rename = "cbr_192")]
    Cbr192,
    #[serde(rename = "cbr_256")]
    Cbr256,
    #[serde(rename = "cbr_320")]
    Cbr320,
    #[serde(rename = "vbr_65")]
    Vbr65,
    #[serde(rename = "vbr_115")]
    Vbr115,
    #[serde(rename = "vbr_165")]
    Vbr165,
    #[serde(rename = "vbr_190")]
    Vbr190,
    #[serde(rename = "vbr_245")]
    Vbr245,
}

impl QualityProfile {
    /// Every profile, in menu order.
    pub const ALL: [QualityProfile; 13] = [
        Self::Default,
        Self::Cbr64,
        Self::Cbr96,
        Self::Cbr128,
        Self::Cbr160,
        Self::Cbr192,
        Self::Cbr256,
        Self::Cbr320,
        Self::Vbr65,
        Self::Vbr115,
        Self::Vbr165,
        Self::Vbr190,
        Self::Vbr245,
    ];

    /// Nominal bitrate in kbps (the approximate average for VBR).
    pub fn bitrate_kbps(&self) -> Option<u32> {
        match self {
            Self::Default => None,
            Self::Cbr64 => Some(64),
            Self::Cbr96 => Some(96),
            Self::Cbr128 => Some(128),
            Self::Cbr160 => Some(160),
            Self::Cbr192 => Some(192),
            Self::Cbr256 => Some(256),
            Self::Cbr320 => Some(320),
            Self::Vbr65 => Some(65),
            Self::Vbr115 => Some(115),
            Self::Vbr165 => Some(165),
            Self::Vbr190 => Some(190),
            Self::Vbr245 => Some(245),
        }
    }

    /// Whether this is a variable bit-rate profile.
    pub fn is_vbr(&self) -> bool {
        matches!(
            self,
            Self::Vbr65 | Self::Vbr115 | Self::Vbr165 | Self::Vbr190 | Self::Vbr245
        )
    }

    /// Returns the wire name of this profile.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Cbr64 => "cbr_64",
            Self::Cbr96 => "cbr_96",
            Self::Cbr128 => "cbr_128",
            Self::Cbr160 => "cbr_160",
            Self::Cbr192 => "cbr_192",
            Self::Cbr256 => "cbr_256",
            Self::Cbr320 => "cbr_320",
            Self::Vbr65 => "vbr_65",
            Self::Vbr115 => "vbr_115",
            Self::Vbr165 => "vbr_165",
            Self::Vbr190 => "vbr_190",
            Self::Vbr245 => "vbr_245",
        }
    }

    /// Human readable label, e.g. "128 kbps CBR".
    pub fn label(&self) -> String {
        match self.bitrate_kbps() {
            None => "Default".to_string(),
            Some(kbps) if self.is_vbr() => format!("~{} kbps VBR", kbps),
            Some(kbps) => format!("{} kbps CBR", kbps),
        }
    }
}

impl fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no quality profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown quality profile: {0}")]
pub struct UnknownQualityProfile(pub String);

impl FromStr for QualityProfile {
    type Err = UnknownQualityProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| UnknownQualityProfile(s.to_string()))
    }
}

/// Display metadata written into the output's ID3 tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

impl EmbeddedMetadata {
    /// Builds metadata from a descriptor, skipping empty fields.
    pub fn from_track(track: &TrackDescriptor) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            title: non_empty(&track.title),
            artist: non_empty(&track.artist),
            album: non_empty(&track.album),
        }
    }

    /// Convert to ffmpeg metadata arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(ref title) = self.title {
            args.extend(["-metadata".to_string(), format!("title={}", title)]);
        }
        if let Some(ref artist) = self.artist {
            args.extend(["-metadata".to_string(), format!("artist={}", artist)]);
        }
        if let Some(ref album) = self.album {
            args.extend(["-metadata".to_string(), format!("album={}", album)]);
        }

        args
    }
}

/// A request to transcode one file.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Id of the track being transcoded.
    pub track_id: String,
    /// Source file path.
    pub source_path: PathBuf,
    /// Audio kind of the source.
    pub source_kind: TrackKind,
    /// Final output path. Nothing exists here unless the transcode succeeds.
    pub destination_path: PathBuf,
    /// Bit-rate profile.
    pub profile: QualityProfile,
    /// Source duration, used to turn encoder timestamps into fractions.
    pub duration_secs: Option<f64>,
    /// Tag metadata for the output.
    pub metadata: EmbeddedMetadata,
}

impl TranscodeJob {
    /// Builds a job for a track descriptor.
    pub fn for_track(
        track: &TrackDescriptor,
        destination_path: PathBuf,
        profile: QualityProfile,
    ) -> Self {
        Self {
            track_id: track.id.clone(),
            source_path: track.path.clone(),
            source_kind: track.kind,
            destination_path,
            profile,
            duration_secs: (track.duration_secs > 0.0).then_some(track.duration_secs),
            metadata: EmbeddedMetadata::from_track(track),
        }
    }

    /// Rejects sources whose kind the encoder cannot decode.
    pub fn ensure_supported_kind(&self) -> Result<(), TranscodeError> {
        if self.source_kind.is_supported() {
            Ok(())
        } else {
            Err(TranscodeError::UnsupportedFormat {
                kind: self.source_kind,
            })
        }
    }
}

/// Result of a successful transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeOutput {
    /// Id of the transcoded track.
    pub track_id: String,
    /// Output file path.
    pub output_path: PathBuf,
    /// Output file size in bytes.
    pub output_size_bytes: u64,
    /// Mean volume in dBFS, when measured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_db: Option<f64>,
    /// Wall time spent encoding, in milliseconds.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_bitrates() {
        assert_eq!(QualityProfile::Default.bitrate_kbps(), None);
        assert_eq!(QualityProfile::Cbr128.bitrate_kbps(), Some(128));
        assert_eq!(QualityProfile::Vbr245.bitrate_kbps(), Some(245));
        assert!(QualityProfile::Vbr65.is_vbr());
        assert!(!QualityProfile::Cbr320.is_vbr());
    }

    #[test]
    fn test_profile_wire_names_round_trip_through_from_str() {
        for profile in QualityProfile::ALL {
            let json = serde_json::to_string(&profile).unwrap();
            assert_eq!(json, format!("\"{}\"", profile.as_str()));
            assert_eq!(profile.as_str().parse::<QualityProfile>().unwrap(), profile);
        }
    }

    #[test]
    fn test_profile_from_str_rejects_unknown() {
        let err = "cbr_100".parse::<QualityProfile>().unwrap_err();
        assert_eq!(err, UnknownQualityProfile("cbr_100".to_string()));
        assert_eq!(" VBR_190 ".parse::<QualityProfile>().unwrap(), QualityProfile::Vbr190);
    }

    #[test]
    fn test_profile_labels() {
        assert_eq!(QualityProfile::Default.label(), "Default");
        assert_eq!(QualityProfile::Cbr192.label(), "192 kbps CBR");
        assert_eq!(QualityProfile::Vbr190.label(), "~190 kbps VBR");
    }

    #[test]
    fn test_job_for_track() {
        let track = TrackDescriptor::new("A1", "/music/a.m4a")
            .with_display("Song", "", "Album")
            .with_duration(200.0);
        let job = TranscodeJob::for_track(&track, PathBuf::from("/out/A1.mp3"), QualityProfile::Cbr192);

        assert_eq!(job.track_id, "A1");
        assert_eq!(job.source_kind, TrackKind::Aac);
        assert_eq!(job.duration_secs, Some(200.0));
        assert_eq!(job.metadata.title.as_deref(), Some("Song"));
        assert_eq!(job.metadata.artist, None);
        assert!(job.ensure_supported_kind().is_ok());
    }

    #[test]
    fn test_job_rejects_unknown_kind() {
        let track = TrackDescriptor::new("B1", "/music/b.flac");
        let job = TranscodeJob::for_track(&track, PathBuf::from("/out/B1.mp3"), QualityProfile::Default);
        assert_eq!(job.duration_secs, None);
        assert_eq!(
            job.ensure_supported_kind(),
            Err(TranscodeError::UnsupportedFormat {
                kind: TrackKind::Unknown
            })
        );
    }

    #[test]
    fn test_embedded_metadata_to_ffmpeg_args() {
        let metadata = EmbeddedMetadata {
            title: Some("Test Song".to_string()),
            artist: Some("Test Artist".to_string()),
            album: None,
        };

        let args = metadata.to_ffmpeg_args();
        assert_eq!(
            args,
            vec![
                "-metadata".to_string(),
                "title=Test Song".to_string(),
                "-metadata".to_string(),
                "artist=Test Artist".to_string(),
            ]
        );
    }
}
