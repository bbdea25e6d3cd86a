//! Transcode coordinator implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::metrics;
use crate::track::TrackDescriptor;
use crate::transcoder::{QualityProfile, Transcoder};

use super::config::CoordinatorConfig;
use super::run::{RunHandle, RunShared};
use super::types::{
    CoordinatorStatus, RunEvent, RunId, RunProgress, RunReport, TrackStatus,
};

/// Error type for coordinator operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    /// A run needs at least one track.
    #[error("Track list is empty")]
    EmptyTrackList,

    /// Concurrency limit below one.
    #[error("Invalid concurrency limit: {0} (must be at least 1)")]
    InvalidConcurrencyLimit(usize),

    /// No run registered under this id.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// The run still has non-terminal tracks.
    #[error("Run is still active: {0}")]
    RunStillActive(RunId),
}

impl CoordinatorError {
    /// Whether the caller supplied structurally invalid input to `start`.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::EmptyTrackList | Self::InvalidConcurrencyLimit(_))
    }
}

fn saturating_dec(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

/// Tracks statistics across every run of a coordinator.
#[derive(Default)]
pub(crate) struct PoolStats {
    active_runs: AtomicU64,
    active_transcodes: AtomicU64,
    queued: AtomicU64,
    total_runs: AtomicU64,
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
    total_cancelled: AtomicU64,
}

impl PoolStats {
    pub(crate) fn run_started(&self, tracks: usize) {
        self.active_runs.fetch_add(1, Ordering::Relaxed);
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(tracks as u64, Ordering::Relaxed);
    }

    pub(crate) fn run_finished(&self) {
        saturating_dec(&self.active_runs);
    }

    pub(crate) fn dequeued(&self) {
        saturating_dec(&self.queued);
    }

    pub(crate) fn transcode_started(&self) {
        self.active_transcodes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transcode_finished(&self) {
        saturating_dec(&self.active_transcodes);
    }

    pub(crate) fn record(&self, status: TrackStatus) {
        let counter = match status {
            TrackStatus::Succeeded => &self.total_succeeded,
            TrackStatus::Failed => &self.total_failed,
            TrackStatus::Cancelled => &self.total_cancelled,
            TrackStatus::Pending | TrackStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_status(
        &self,
        transcoder: &str,
        default_concurrency: usize,
        registered_runs: usize,
    ) -> CoordinatorStatus {
        CoordinatorStatus {
            transcoder: transcoder.to_string(),
            default_concurrency,
            active_runs: self.active_runs.load(Ordering::Relaxed) as usize,
            registered_runs,
            active_transcodes: self.active_transcodes.load(Ordering::Relaxed) as usize,
            queued_tracks: self.queued.load(Ordering::Relaxed) as usize,
            total_runs: self.total_runs.load(Ordering::Relaxed),
            total_succeeded: self.total_succeeded.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_cancelled: self.total_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Supervises bounded pools of concurrent transcodes, one pool per run.
pub struct TranscodeCoordinator {
    config: CoordinatorConfig,
    transcoder: Arc<dyn Transcoder>,
    runs: Arc<RwLock<HashMap<RunId, RunHandle>>>,
    events: broadcast::Sender<RunEvent>,
    stats: Arc<PoolStats>,
}

impl TranscodeCoordinator {
    /// Creates a new coordinator around a transcoder.
    pub fn new(config: CoordinatorConfig, transcoder: impl Transcoder + 'static) -> Self {
        Self::with_shared_transcoder(config, Arc::new(transcoder))
    }

    /// Creates a coordinator sharing an existing transcoder.
    pub fn with_shared_transcoder(config: CoordinatorConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            transcoder,
            runs: Arc::new(RwLock::new(HashMap::new())),
            events,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    /// Subscribes to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Starts a run using the configured defaults for anything not given.
    pub async fn start_with_defaults(
        &self,
        tracks: Vec<TrackDescriptor>,
        profile: Option<QualityProfile>,
        concurrency_limit: Option<usize>,
        output_dir: Option<PathBuf>,
    ) -> Result<RunHandle, CoordinatorError> {
        self.start(
            tracks,
            profile.unwrap_or(self.config.default_quality),
            concurrency_limit.unwrap_or(self.config.max_concurrent_transcodes),
            output_dir.unwrap_or_else(|| self.config.output_dir.clone()),
        )
        .await
    }

    /// Starts a run.
    ///
    /// Rejects an empty track list or a zero concurrency limit before any
    /// track state exists. Otherwise every track starts `pending` and
    /// `min(concurrency_limit, tracks.len())` workers begin dequeuing in
    /// original order.
    pub async fn start(
        &self,
        tracks: Vec<TrackDescriptor>,
        profile: QualityProfile,
        concurrency_limit: usize,
        output_dir: PathBuf,
    ) -> Result<RunHandle, CoordinatorError> {
        if tracks.is_empty() {
            return Err(CoordinatorError::EmptyTrackList);
        }
        if concurrency_limit < 1 {
            return Err(CoordinatorError::InvalidConcurrencyLimit(concurrency_limit));
        }

        let track_count = tracks.len();
        let shared = Arc::new(RunShared::new(
            tracks,
            profile,
            concurrency_limit,
            &output_dir,
            self.events.clone(),
            Arc::clone(&self.stats),
        ));
        let handle = RunHandle::new(Arc::clone(&shared));
        let run_id = shared.id();

        self.runs.write().await.insert(run_id, handle.clone());
        self.stats.run_started(track_count);
        metrics::RUNS_STARTED.inc();

        info!(
            run_id = %run_id,
            tracks = track_count,
            profile = profile.as_str(),
            concurrency = concurrency_limit,
            output_dir = %output_dir.display(),
            "Starting run"
        );
        shared.emit_started();

        let workers = concurrency_limit.min(track_count);
        let transcoder = Arc::clone(&self.transcoder);
        tokio::spawn(async move {
            let mut pool = JoinSet::new();
            for _ in 0..workers {
                pool.spawn(Arc::clone(&shared).work(Arc::clone(&transcoder)));
            }
            debug!(run_id = %run_id, workers, "Workers spawned");

            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    error!(run_id = %run_id, "Worker exited abnormally: {}", e);
                    // Keep the pool at full size while tracks are waiting.
                    if shared.has_queued() {
                        pool.spawn(Arc::clone(&shared).work(Arc::clone(&transcoder)));
                    }
                }
            }
            shared.finish();
        });

        Ok(handle)
    }

    /// Requests cooperative cancellation of a run. Idempotent.
    pub fn cancel(&self, handle: &RunHandle) -> bool {
        handle.cancel()
    }

    /// Non-blocking progress snapshot of a run.
    pub fn progress(&self, handle: &RunHandle) -> RunProgress {
        handle.progress()
    }

    /// Waits for every track of a run to be terminal.
    pub async fn await_run(&self, handle: &RunHandle) -> RunReport {
        handle.wait().await
    }

    /// Looks up a registered run.
    pub async fn run(&self, id: RunId) -> Option<RunHandle> {
        self.runs.read().await.get(&id).cloned()
    }

    /// Looks up a registered run, failing if it is unknown.
    pub async fn get_run(&self, id: RunId) -> Result<RunHandle, CoordinatorError> {
        self.run(id).await.ok_or(CoordinatorError::RunNotFound(id))
    }

    /// Every registered run, oldest first.
    pub async fn runs(&self) -> Vec<RunHandle> {
        let runs = self.runs.read().await;
        let mut handles: Vec<RunHandle> = runs.values().cloned().collect();
        handles.sort_by_key(|h| h.progress().created_at);
        handles
    }

    /// Cancels a registered run by id.
    pub async fn cancel_run(&self, id: RunId) -> Result<bool, CoordinatorError> {
        Ok(self.get_run(id).await?.cancel())
    }

    /// Drops a finished run from the registry.
    pub async fn forget(&self, id: RunId) -> Result<RunHandle, CoordinatorError> {
        let mut runs = self.runs.write().await;
        match runs.get(&id) {
            None => Err(CoordinatorError::RunNotFound(id)),
            Some(handle) if !handle.is_finished() => Err(CoordinatorError::RunStillActive(id)),
            Some(_) => runs.remove(&id).ok_or(CoordinatorError::RunNotFound(id)),
        }
    }

    /// Cancels every unfinished run. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let runs = self.runs.read().await;
        let cancelled = runs.values().filter(|h| h.cancel()).count();
        if cancelled > 0 {
            info!("Cancelled {} run(s)", cancelled);
        }
        cancelled
    }

    /// Pool statistics.
    pub async fn status(&self) -> CoordinatorStatus {
        let registered = self.runs.read().await.len();
        self.stats.to_status(
            self.transcoder.name(),
            self.config.max_concurrent_transcodes,
            registered,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockTranscoder};
    use tempfile::TempDir;

    fn coordinator(mock: &MockTranscoder, dir: &TempDir) -> TranscodeCoordinator {
        TranscodeCoordinator::new(
            CoordinatorConfig::default().with_output_dir(dir.path()),
            mock.clone(),
        )
    }

    #[test]
    fn test_invalid_input_classification() {
        assert!(CoordinatorError::EmptyTrackList.is_invalid_input());
        assert!(CoordinatorError::InvalidConcurrencyLimit(0).is_invalid_input());
        assert!(!CoordinatorError::RunNotFound(RunId::new()).is_invalid_input());
        assert!(!CoordinatorError::RunStillActive(RunId::new()).is_invalid_input());
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        let coordinator = coordinator(&mock, &dir);

        let err = coordinator
            .start(vec![], QualityProfile::Default, 2, dir.path().to_path_buf())
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::EmptyTrackList);

        let err = coordinator
            .start(fixtures::tracks(2), QualityProfile::Default, 0, dir.path().to_path_buf())
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::InvalidConcurrencyLimit(0));

        assert!(coordinator.runs().await.is_empty());
        assert_eq!(mock.transcode_count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_forget() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.pause();
        let coordinator = coordinator(&mock, &dir);

        let handle = coordinator
            .start_with_defaults(fixtures::tracks(1), None, None, None)
            .await
            .unwrap();
        let id = handle.id();

        assert!(coordinator.run(id).await.is_some());
        assert_eq!(
            coordinator.forget(id).await.unwrap_err(),
            CoordinatorError::RunStillActive(id)
        );

        mock.resume();
        coordinator.await_run(&handle).await;
        assert!(coordinator.forget(id).await.is_ok());
        assert_eq!(
            coordinator.forget(id).await.unwrap_err(),
            CoordinatorError::RunNotFound(id)
        );
    }

    #[tokio::test]
    async fn test_status_counts() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        let mut tracks = fixtures::tracks(2);
        tracks.push(fixtures::unsupported_track("X"));
        let coordinator = coordinator(&mock, &dir);

        let handle = coordinator
            .start(tracks, QualityProfile::Cbr192, 2, dir.path().to_path_buf())
            .await
            .unwrap();
        coordinator.await_run(&handle).await;

        let status = coordinator.status().await;
        assert_eq!(status.transcoder, "mock");
        assert_eq!(status.total_runs, 1);
        assert_eq!(status.total_succeeded, 2);
        assert_eq!(status.total_failed, 1);
        assert_eq!(status.active_runs, 0);
        assert_eq!(status.active_transcodes, 0);
        assert_eq!(status.queued_tracks, 0);
    }
}
