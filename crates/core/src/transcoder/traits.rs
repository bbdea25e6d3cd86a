//! Trait definitions for the transcoder module.

use async_trait::async_trait;

use super::error::TranscodeError;
use super::progress::ProgressReporter;
use super::types::{TranscodeJob, TranscodeOutput};
use crate::track::TrackKind;

/// Something that can transcode one audio file to MP3.
///
/// Implementations are invoked concurrently, one call per worker, and must
/// not share mutable state between calls.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Transcodes `job.source_path` into `job.destination_path`.
    ///
    /// Must reject unsupported source kinds before touching the destination,
    /// report progress through `progress`, and stop with
    /// [`TranscodeError::Cancelled`] once `progress.report` returns `false`.
    /// On any error no file is left at the destination.
    async fn transcode(
        &self,
        job: TranscodeJob,
        progress: ProgressReporter,
    ) -> Result<TranscodeOutput, TranscodeError>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), TranscodeError>;

    /// Returns the accepted source kinds.
    fn supported_kinds(&self) -> &[TrackKind] {
        &TrackKind::SUPPORTED
    }
}
