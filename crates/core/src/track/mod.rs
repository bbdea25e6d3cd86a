//! Track descriptors handed to the engine by the library collaborator.
//!
//! Descriptors are immutable inputs: the coordinator reads them to build
//! transcode jobs but never mutates them. Per-track mutable state lives in
//! [`crate::coordinator::TrackState`].

mod types;

pub use types::{TrackDescriptor, TrackKind};
