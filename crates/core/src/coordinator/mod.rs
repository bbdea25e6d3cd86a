//! Coordinator module for supervising transcoding runs.
//!
//! A run takes an ordered list of tracks, a quality profile and a concurrency
//! limit. The `TranscodeCoordinator` creates one `pending` [`TrackState`] per
//! track, dispatches tracks to a bounded pool of workers in original order,
//! aggregates fractional progress and supports cooperative cancellation.
//! Every track ends in exactly one of `succeeded`, `failed` or `cancelled`;
//! one track failing never stops the others.
//!
//! # Example
//!
//! ```ignore
//! use mp3disc_core::coordinator::{CoordinatorConfig, TranscodeCoordinator};
//! use mp3disc_core::transcoder::{FfmpegTranscoder, QualityProfile};
//!
//! let coordinator = TranscodeCoordinator::new(
//!     CoordinatorConfig::default(),
//!     FfmpegTranscoder::with_defaults(),
//! );
//! let run = coordinator
//!     .start(tracks, QualityProfile::Vbr190, 2, "/tmp/disc".into())
//!     .await?;
//!
//! println!("{:.0}%", run.progress().overall_fraction * 100.0);
//! let report = run.wait().await;
//! println!("{}", report.summary());
//! ```

mod config;
mod engine;
mod run;
mod types;

pub use config::CoordinatorConfig;
pub use engine::{CoordinatorError, TranscodeCoordinator};
pub use run::RunHandle;
pub use types::{
    CoordinatorStatus, RunEvent, RunId, RunProgress, RunReport, RunStatus, RunSummary,
    TrackFailure, TrackState, TrackStatus,
};
