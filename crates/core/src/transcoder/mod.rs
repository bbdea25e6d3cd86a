//! Transcoder module: turns one source audio file into one MP3 file.
//!
//! This module provides the `Transcoder` trait and the ffmpeg-backed
//! implementation used in production.
//!
//! # Features
//!
//! - MP3 encoding at a closed set of CBR/VBR quality profiles
//! - Fractional progress reporting with cooperative cancellation
//! - Loudness measurement (mean volume) while encoding
//! - Partial output is always removed on failure or cancellation
//!
//! # Example
//!
//! ```ignore
//! use mp3disc_core::transcoder::{FfmpegTranscoder, ProgressReporter, QualityProfile, TranscodeJob, Transcoder};
//!
//! let transcoder = FfmpegTranscoder::with_defaults();
//! transcoder.validate().await?;
//!
//! let job = TranscodeJob::for_track(&track, PathBuf::from("/tmp/out/A1.mp3"), QualityProfile::Vbr190);
//! let reporter = ProgressReporter::new(CancellationToken::new(), |fraction| {
//!     println!("{:.0}%", fraction * 100.0);
//! });
//!
//! let output = transcoder.transcode(job, reporter).await?;
//! println!("Wrote {} bytes", output.output_size_bytes);
//! ```

mod config;
mod error;
mod ffmpeg;
mod progress;
mod traits;
mod types;

pub use config::TranscoderConfig;
pub use error::{FailureReason, TranscodeError};
pub use ffmpeg::FfmpegTranscoder;
pub use progress::ProgressReporter;
pub use traits::Transcoder;
pub use types::{
    EmbeddedMetadata, QualityProfile, TranscodeJob, TranscodeOutput, UnknownQualityProfile,
};
