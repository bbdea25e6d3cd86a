pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod testing;
pub mod track;
pub mod transcoder;

pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError, ServerConfig,
};
pub use coordinator::{
    CoordinatorConfig, CoordinatorError, CoordinatorStatus, RunEvent, RunHandle, RunId,
    RunProgress, RunReport, RunStatus, RunSummary, TrackFailure, TrackState, TrackStatus,
    TranscodeCoordinator,
};
pub use track::{TrackDescriptor, TrackKind};
pub use transcoder::{
    EmbeddedMetadata, FailureReason, FfmpegTranscoder, ProgressReporter, QualityProfile,
    TranscodeError, TranscodeJob, TranscodeOutput, Transcoder, TranscoderConfig,
    UnknownQualityProfile,
};
