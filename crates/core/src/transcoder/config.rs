//! Configuration for the transcoder module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// FFmpeg log levels quieter than `info`; these hide `volumedetect` output.
const QUIET_LOG_LEVELS: [&str; 5] = ["quiet", "panic", "fatal", "error", "warning"];

/// Configuration for the ffmpeg-based transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Per-file limit in seconds. 0 disables the limit.
    #[serde(default)]
    pub timeout_secs: u64,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Whether to measure mean volume while encoding.
    #[serde(default = "default_measure_level")]
    pub measure_level: bool,

    /// Additional ffmpeg output arguments.
    #[serde(default)]
    pub extra_ffmpeg_args: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_measure_level() -> bool {
    true
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: 0,
            ffmpeg_log_level: default_log_level(),
            measure_level: default_measure_level(),
            extra_ffmpeg_args: Vec::new(),
        }
    }
}

impl TranscoderConfig {
    /// Creates a new config with a custom ffmpeg path.
    pub fn with_ffmpeg_path(ffmpeg_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ..Default::default()
        }
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Enables or disables level measurement.
    pub fn with_measure_level(mut self, enabled: bool) -> Self {
        self.measure_level = enabled;
        self
    }

    /// Returns the per-file limit, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Whether the log level lets `volumedetect` results reach stderr.
    pub fn log_level_reports_volume(&self) -> bool {
        !QUIET_LOG_LEVELS.contains(&self.ffmpeg_log_level.to_ascii_lowercase().as_str())
    }
}
