//! Types for the coordinator module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::transcoder::{FailureReason, QualityProfile, TranscodeError, TranscodeOutput};

/// Lifecycle status of one track within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TrackStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: TrackStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a track failed, as recorded in its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl TrackFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<&TranscodeError> for TrackFailure {
    fn from(err: &TranscodeError) -> Self {
        Self::new(err.reason(), err.to_string())
    }
}

/// Mutable outcome record for one track, owned by the coordinator.
///
/// Exactly one of (`output_path` + `output_size`) or `error` is populated
/// once the track has left `running`, and neither before that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// Id of the track this state belongs to.
    pub track_id: String,
    pub status: TrackStatus,
    /// Fraction done in `[0.0, 1.0]`, never decreasing.
    pub fraction_done: f64,
    /// Mean volume in dBFS, when the transcoder measured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TrackFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrackState {
    /// Creates the initial `pending` state for a track.
    pub fn pending(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            status: TrackStatus::Pending,
            fraction_done: 0.0,
            measured_level: None,
            output_path: None,
            output_size: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: TrackStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        let now = Utc::now();
        if next == TrackStatus::Running {
            self.started_at = Some(now);
        } else {
            self.finished_at = Some(now);
        }
        true
    }

    pub(crate) fn mark_running(&mut self) -> bool {
        self.transition(TrackStatus::Running)
    }

    /// Raises the fraction while running. Returns whether it changed.
    pub(crate) fn record_progress(&mut self, fraction: f64) -> bool {
        if self.status != TrackStatus::Running || !fraction.is_finite() {
            return false;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= self.fraction_done {
            return false;
        }
        self.fraction_done = fraction;
        true
    }

    pub(crate) fn mark_succeeded(&mut self, output: &TranscodeOutput) -> bool {
        if !self.transition(TrackStatus::Succeeded) {
            return false;
        }
        self.fraction_done = 1.0;
        self.measured_level = output.level_db;
        self.output_path = Some(output.output_path.clone());
        self.output_size = Some(output.output_size_bytes);
        true
    }

    pub(crate) fn mark_failed(&mut self, failure: TrackFailure) -> bool {
        if !self.transition(TrackStatus::Failed) {
            return false;
        }
        self.error = Some(failure);
        true
    }

    pub(crate) fn mark_cancelled(&mut self) -> bool {
        self.transition(TrackStatus::Cancelled)
    }
}

/// Unique identifier of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// At least one track is not terminal yet.
    Running,
    /// Every track is terminal and no cancellation was requested.
    Completed,
    /// Every track is terminal after a cancellation request.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Non-blocking snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: RunId,
    pub status: RunStatus,
    pub profile: QualityProfile,
    pub concurrency_limit: usize,
    pub created_at: DateTime<Utc>,
    /// Mean of every track's `fraction_done`.
    pub overall_fraction: f64,
    /// Per-track states in original order.
    pub tracks: Vec<TrackState>,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Final state of every track, in original order.
    pub tracks: Vec<TrackState>,
    /// Whether cancellation was requested during the run.
    pub was_cancelled: bool,
}

impl RunReport {
    /// Counts outcomes, grouping failures by reason.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.tracks.len(),
            ..RunSummary::default()
        };
        for track in &self.tracks {
            match track.status {
                TrackStatus::Succeeded => summary.succeeded += 1,
                TrackStatus::Cancelled => summary.cancelled += 1,
                TrackStatus::Failed => {
                    summary.failed += 1;
                    if let Some(ref failure) = track.error {
                        *summary.failures_by_reason.entry(failure.reason).or_default() += 1;
                    }
                }
                TrackStatus::Pending | TrackStatus::Running => {}
            }
        }
        summary
    }

    /// For callers that treat any failed track as a failed run.
    pub fn any_failed(&self) -> bool {
        self.tracks.iter().any(|t| t.status == TrackStatus::Failed)
    }
}

/// Outcome counts for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures_by_reason: BTreeMap<FailureReason, usize>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} succeeded", self.succeeded, self.total)?;
        if self.failed > 0 {
            let reasons: Vec<&str> = self.failures_by_reason.keys().map(|r| r.as_str()).collect();
            write!(f, ", {} failed ({})", self.failed, reasons.join(", "))?;
        }
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

/// Notification published while runs make progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        track_count: usize,
        profile: QualityProfile,
        concurrency_limit: usize,
        overall_fraction: f64,
    },
    TrackStarted {
        run_id: RunId,
        index: usize,
        track_id: String,
        overall_fraction: f64,
    },
    TrackProgress {
        run_id: RunId,
        index: usize,
        track_id: String,
        fraction: f64,
        overall_fraction: f64,
    },
    TrackFinished {
        run_id: RunId,
        index: usize,
        track_id: String,
        status: TrackStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TrackFailure>,
        overall_fraction: f64,
    },
    RunFinished {
        run_id: RunId,
        was_cancelled: bool,
        summary: RunSummary,
        overall_fraction: f64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::TrackStarted { run_id, .. }
            | Self::TrackProgress { run_id, .. }
            | Self::TrackFinished { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }

    pub fn overall_fraction(&self) -> f64 {
        match self {
            Self::RunStarted {
                overall_fraction, ..
            }
            | Self::TrackStarted {
                overall_fraction, ..
            }
            | Self::TrackProgress {
                overall_fraction, ..
            }
            | Self::TrackFinished {
                overall_fraction, ..
            }
            | Self::RunFinished {
                overall_fraction, ..
            } => *overall_fraction,
        }
    }
}

/// Coordinator pool statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Name of the transcoder in use.
    pub transcoder: String,
    /// Pool size applied when a run does not name one.
    pub default_concurrency: usize,
    /// Runs with at least one non-terminal track.
    pub active_runs: usize,
    /// Runs held in the registry.
    pub registered_runs: usize,
    /// Tracks currently inside the transcoder.
    pub active_transcodes: usize,
    /// Tracks waiting for a worker.
    pub queued_tracks: usize,
    /// Runs started since startup.
    pub total_runs: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
}
