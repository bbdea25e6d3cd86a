//! Configuration for the coordinator module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::transcoder::QualityProfile;

/// Defaults applied when a run is started without explicit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Worker pool size used when a run does not name one.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transcodes: usize,

    /// Directory output files are written to by default.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Quality profile used by default.
    #[serde(default)]
    pub default_quality: QualityProfile,

    /// Capacity of the run event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("mp3disc")
}

fn default_event_buffer() -> usize {
    256
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transcodes: default_max_concurrent(),
            output_dir: default_output_dir(),
            default_quality: QualityProfile::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl CoordinatorConfig {
    /// Sets the default worker pool size.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_transcodes = max;
        self
    }

    /// Sets the default output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the default quality profile.
    pub fn with_default_quality(mut self, quality: QualityProfile) -> Self {
        self.default_quality = quality;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}
