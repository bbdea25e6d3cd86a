//! Error types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::track::TrackKind;

/// Why a single track failed to transcode.
///
/// This is the coarse taxonomy recorded in a track's state; the full
/// [`TranscodeError`] carries the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Source missing or not readable.
    SourceUnreadable,
    /// Source kind is not one the encoder accepts.
    UnsupportedFormat,
    /// Encoder failed, timed out or is missing.
    CodecError,
    /// Output could not be created, written or moved into place.
    DestinationWriteError,
    /// Stopped cooperatively.
    Cancelled,
}

impl FailureReason {
    /// Returns the wire name of this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceUnreadable => "source_unreadable",
            Self::UnsupportedFormat => "unsupported_format",
            Self::CodecError => "codec_error",
            Self::DestinationWriteError => "destination_write_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while transcoding one file.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranscodeError {
    /// Source file missing or unreadable.
    #[error("Source unreadable: {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    /// Source kind is not supported.
    #[error("Unsupported source format: {kind}")]
    UnsupportedFormat { kind: TrackKind },

    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    EncoderNotFound { path: PathBuf },

    /// The encoder ran but failed.
    #[error("Encoding failed: {reason}")]
    CodecFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Encoding exceeded the configured per-file limit.
    #[error("Encoding timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Output could not be written.
    #[error("Cannot write destination {path}: {reason}")]
    DestinationWrite { path: PathBuf, reason: String },

    /// Transcode was cancelled.
    #[error("Transcode cancelled")]
    Cancelled,
}

impl TranscodeError {
    /// Creates a source unreadable error.
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a codec failure with optional stderr output.
    pub fn codec_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::CodecFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a destination write error.
    pub fn destination_write(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::DestinationWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Maps this error onto the failure taxonomy.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::SourceUnreadable { .. } => FailureReason::SourceUnreadable,
            Self::UnsupportedFormat { .. } => FailureReason::UnsupportedFormat,
            Self::EncoderNotFound { .. } | Self::CodecFailed { .. } | Self::Timeout { .. } => {
                FailureReason::CodecError
            }
            Self::DestinationWrite { .. } => FailureReason::DestinationWriteError,
            Self::Cancelled => FailureReason::Cancelled,
        }
    }

    /// Whether this error means the transcode was stopped on request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            TranscodeError::source_unreadable("/a.wav", "missing").reason(),
            FailureReason::SourceUnreadable
        );
        assert_eq!(
            TranscodeError::UnsupportedFormat {
                kind: TrackKind::Unknown
            }
            .reason(),
            FailureReason::UnsupportedFormat
        );
        assert_eq!(
            TranscodeError::Timeout { timeout_secs: 5 }.reason(),
            FailureReason::CodecError
        );
        assert_eq!(
            TranscodeError::EncoderNotFound {
                path: PathBuf::from("ffmpeg")
            }
            .reason(),
            FailureReason::CodecError
        );
        assert_eq!(
            TranscodeError::destination_write("/out/a.mp3", "read-only").reason(),
            FailureReason::DestinationWriteError
        );
        assert!(TranscodeError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let json = serde_json::to_string(&FailureReason::UnsupportedFormat).unwrap();
        assert_eq!(json, "\"unsupported_format\"");
        assert_eq!(FailureReason::CodecError.to_string(), "codec_error");
    }
}
