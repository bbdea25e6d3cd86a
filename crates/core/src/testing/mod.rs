//! Testing utilities and mock implementations.
//!
//! This module provides a controllable [`MockTranscoder`] and track
//! fixtures, allowing coordinator and API tests to run without ffmpeg.
//!
//! # Example
//!
//! ```rust,ignore
//! use mp3disc_core::testing::{fixtures, MockTranscoder};
//!
//! let transcoder = MockTranscoder::new();
//! transcoder.set_steps(10, Duration::from_millis(20)).await;
//!
//! let tracks = fixtures::tracks(3);
//! // Hand `transcoder.clone()` to a coordinator...
//! ```

mod mock_transcoder;

pub use mock_transcoder::MockTranscoder;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::track::{TrackDescriptor, TrackKind};

    /// Create a WAV track with reasonable defaults.
    pub fn track(id: &str) -> TrackDescriptor {
        TrackDescriptor::new(id, format!("/music/{}.wav", id))
            .with_display(format!("Song {}", id), "Test Artist", "Test Album")
            .with_duration(180.0)
            .with_size(30 * 1024 * 1024)
    }

    /// Create `count` tracks with ids `T01`, `T02`, ...
    pub fn tracks(count: usize) -> Vec<TrackDescriptor> {
        (1..=count).map(|i| track(&format!("T{:02}", i))).collect()
    }

    /// Create a track whose kind no transcoder accepts.
    pub fn unsupported_track(id: &str) -> TrackDescriptor {
        TrackDescriptor::new(id, format!("/music/{}.wma", id))
            .with_display(format!("Song {}", id), "Test Artist", "Test Album")
            .with_duration(200.0)
            .with_kind(TrackKind::Unknown)
    }
}
