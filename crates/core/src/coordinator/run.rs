//! Per-run shared state and worker loop.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::track::TrackDescriptor;
use crate::transcoder::{
    FailureReason, ProgressReporter, QualityProfile, TranscodeError, TranscodeJob, Transcoder,
};

use super::engine::PoolStats;
use super::types::{
    RunEvent, RunId, RunProgress, RunReport, RunStatus, TrackFailure, TrackState, TrackStatus,
};

/// Shared state of one run.
///
/// Each `TrackState` is written only by the worker that dequeued its index,
/// except for still-queued tracks, which the cancel path marks while holding
/// the queue lock.
pub(crate) struct RunShared {
    id: RunId,
    created_at: DateTime<Utc>,
    profile: QualityProfile,
    concurrency_limit: usize,
    tracks: Vec<TrackDescriptor>,
    destinations: Vec<PathBuf>,
    states: Vec<RwLock<TrackState>>,
    queue: Mutex<VecDeque<usize>>,
    cancel: CancellationToken,
    cancel_requested: AtomicBool,
    outcome: OnceLock<RunStatus>,
    done: watch::Sender<bool>,
    events: broadcast::Sender<RunEvent>,
    stats: Arc<PoolStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Filename-safe form of a track id.
pub(crate) fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "track".to_string()
    } else {
        stem.to_string()
    }
}

/// Output paths for every track, `<dir>/<id>.mp3`, suffixed with the track
/// position when two ids collide after sanitizing.
pub(crate) fn output_paths(output_dir: &Path, tracks: &[TrackDescriptor]) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let mut stem = sanitize_file_stem(&track.id);
            if !taken.insert(stem.to_lowercase()) {
                stem = format!("{}-{}", stem, index + 1);
                taken.insert(stem.to_lowercase());
            }
            output_dir.join(format!("{}.mp3", stem))
        })
        .collect()
}

impl RunShared {
    pub(crate) fn new(
        tracks: Vec<TrackDescriptor>,
        profile: QualityProfile,
        concurrency_limit: usize,
        output_dir: &Path,
        events: broadcast::Sender<RunEvent>,
        stats: Arc<PoolStats>,
    ) -> Self {
        let destinations = output_paths(output_dir, &tracks);
        let states = tracks
            .iter()
            .map(|t| RwLock::new(TrackState::pending(t.id.clone())))
            .collect();
        let queue = (0..tracks.len()).collect();
        let (done, _) = watch::channel(false);

        Self {
            id: RunId::new(),
            created_at: Utc::now(),
            profile,
            concurrency_limit,
            tracks,
            destinations,
            states,
            queue: Mutex::new(queue),
            cancel: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
            outcome: OnceLock::new(),
            done,
            events,
            stats,
        }
    }

    pub(crate) fn id(&self) -> RunId {
        self.id
    }

    pub(crate) fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub(crate) fn profile(&self) -> QualityProfile {
        self.profile
    }

    pub(crate) fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    fn read_state(&self, index: usize) -> TrackState {
        self.states[index]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_state<R>(&self, index: usize, f: impl FnOnce(&mut TrackState) -> R) -> R {
        let mut state = self.states[index]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn snapshot(&self) -> Vec<TrackState> {
        (0..self.states.len()).map(|i| self.read_state(i)).collect()
    }

    /// Mean of every track's fraction.
    fn overall_fraction(&self) -> f64 {
        let total: f64 = self
            .states
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).fraction_done)
            .sum();
        total / self.states.len() as f64
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_started(&self) {
        self.emit(RunEvent::RunStarted {
            run_id: self.id,
            track_count: self.tracks.len(),
            profile: self.profile,
            concurrency_limit: self.concurrency_limit,
            overall_fraction: 0.0,
        });
    }

    pub(crate) fn status(&self) -> RunStatus {
        self.outcome.get().copied().unwrap_or(RunStatus::Running)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub(crate) fn progress(&self) -> RunProgress {
        let tracks = self.snapshot();
        let overall_fraction =
            tracks.iter().map(|t| t.fraction_done).sum::<f64>() / tracks.len() as f64;
        RunProgress {
            run_id: self.id,
            status: self.status(),
            profile: self.profile,
            concurrency_limit: self.concurrency_limit,
            created_at: self.created_at,
            overall_fraction,
            tracks,
        }
    }

    /// The final report, once every track is terminal.
    pub(crate) fn report(&self) -> Option<RunReport> {
        let outcome = self.outcome.get()?;
        Some(RunReport {
            run_id: self.id,
            tracks: self.snapshot(),
            was_cancelled: *outcome == RunStatus::Cancelled,
        })
    }

    pub(crate) async fn wait(&self) -> RunReport {
        let mut done = self.done.subscribe();
        loop {
            let finished = *done.borrow_and_update();
            // The sender lives as long as `self`, so `changed` cannot fail first.
            if finished || done.changed().await.is_err() {
                break;
            }
        }
        self.report().unwrap_or_else(|| RunReport {
            run_id: self.id,
            tracks: self.snapshot(),
            was_cancelled: self.cancel_requested.load(Ordering::SeqCst),
        })
    }

    /// Marks every still-queued track cancelled. Caller holds the queue lock.
    fn drain_cancelled(&self, queue: &mut VecDeque<usize>) {
        for index in queue.drain(..) {
            self.stats.dequeued();
            if self.update_state(index, |s| s.mark_cancelled()) {
                self.stats.record(TrackStatus::Cancelled);
                self.emit(RunEvent::TrackFinished {
                    run_id: self.id,
                    index,
                    track_id: self.tracks[index].id.clone(),
                    status: TrackStatus::Cancelled,
                    error: None,
                    overall_fraction: self.overall_fraction(),
                });
            }
        }
    }

    /// Requests cooperative cancellation. Returns `false` when the run had
    /// already finished or cancellation was already requested.
    pub(crate) fn cancel(&self) -> bool {
        if self.is_finished() || self.cancel_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(run_id = %self.id, "Cancelling run");
        self.cancel.cancel();
        let mut queue = lock(&self.queue);
        self.drain_cancelled(&mut queue);
        true
    }

    /// Takes the next pending index in FIFO order and marks it running.
    fn dispatch_next(&self) -> Option<usize> {
        let mut queue = lock(&self.queue);
        if self.cancel.is_cancelled() {
            self.drain_cancelled(&mut queue);
            return None;
        }
        let index = queue.pop_front()?;
        self.update_state(index, |s| s.mark_running());
        self.stats.dequeued();
        self.stats.transcode_started();
        Some(index)
    }

    fn record_progress(&self, index: usize, fraction: f64) {
        if let Some(fraction) = self.update_state(index, |s| {
            s.record_progress(fraction).then_some(s.fraction_done)
        }) {
            self.emit(RunEvent::TrackProgress {
                run_id: self.id,
                index,
                track_id: self.tracks[index].id.clone(),
                fraction,
                overall_fraction: self.overall_fraction(),
            });
        }
    }

    /// Runs one dequeued track through the transcoder and records the outcome.
    async fn execute(self: &Arc<Self>, index: usize, transcoder: &dyn Transcoder) {
        let track = &self.tracks[index];
        debug!(run_id = %self.id, index, track_id = %track.id, "Dispatching track");
        self.emit(RunEvent::TrackStarted {
            run_id: self.id,
            index,
            track_id: track.id.clone(),
            overall_fraction: self.overall_fraction(),
        });

        let job = TranscodeJob::for_track(track, self.destinations[index].clone(), self.profile);
        let sink_run = Arc::clone(self);
        let reporter = ProgressReporter::new(self.cancel.child_token(), move |fraction| {
            sink_run.record_progress(index, fraction)
        });

        let start = Instant::now();
        // A panicking transcode fails its own track; the worker keeps going.
        let result = match AssertUnwindSafe(transcoder.transcode(job, reporter))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = format!("Transcoder panicked: {}", panic_message(panic.as_ref()));
                error!(run_id = %self.id, track_id = %track.id, "{}", message);
                Err(TranscodeError::codec_failed(message, None))
            }
        };

        let (status, error) = match result {
            Ok(output) if output.output_size_bytes > 0 => {
                self.update_state(index, |s| s.mark_succeeded(&output));
                info!(
                    run_id = %self.id,
                    track_id = %track.id,
                    size = output.output_size_bytes,
                    "Track transcoded"
                );
                (TrackStatus::Succeeded, None)
            }
            Ok(output) => {
                let failure = TrackFailure::new(
                    FailureReason::CodecError,
                    format!("Encoder produced an empty file: {}", output.output_path.display()),
                );
                warn!(run_id = %self.id, track_id = %track.id, "{}", failure.message);
                if let Err(e) = tokio::fs::remove_file(&output.output_path).await {
                    debug!(path = %output.output_path.display(), "Could not remove empty output: {}", e);
                }
                self.update_state(index, |s| s.mark_failed(failure.clone()));
                (TrackStatus::Failed, Some(failure))
            }
            Err(e) if e.is_cancelled() => {
                self.update_state(index, |s| s.mark_cancelled());
                debug!(run_id = %self.id, track_id = %track.id, "Track cancelled");
                (TrackStatus::Cancelled, None)
            }
            Err(e) => {
                let failure = TrackFailure::from(&e);
                warn!(run_id = %self.id, track_id = %track.id, "Track failed: {}", e);
                self.update_state(index, |s| s.mark_failed(failure.clone()));
                (TrackStatus::Failed, Some(failure))
            }
        };

        metrics::TRANSCODES_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
        metrics::TRANSCODE_DURATION
            .with_label_values(&[status.as_str()])
            .observe(start.elapsed().as_secs_f64());
        self.stats.transcode_finished();
        self.stats.record(status);

        self.emit(RunEvent::TrackFinished {
            run_id: self.id,
            index,
            track_id: track.id.clone(),
            status,
            error,
            overall_fraction: self.overall_fraction(),
        });
    }

    /// Whether tracks are still waiting for a worker.
    pub(crate) fn has_queued(&self) -> bool {
        !lock(&self.queue).is_empty()
    }

    /// Worker loop: dequeue, transcode, repeat until the queue is empty or
    /// the run is cancelled.
    pub(crate) async fn work(self: Arc<Self>, transcoder: Arc<dyn Transcoder>) {
        while let Some(index) = self.dispatch_next() {
            self.execute(index, transcoder.as_ref()).await;
        }
    }

    /// Settles every track left non-terminal and publishes the outcome.
    ///
    /// Called once all workers have exited. A track still `running` here
    /// belonged to a worker that died abnormally.
    pub(crate) fn finish(&self) {
        let cancelled = self.cancel_requested.load(Ordering::SeqCst);
        {
            let mut queue = lock(&self.queue);
            if cancelled {
                self.drain_cancelled(&mut queue);
            } else {
                for _ in queue.drain(..) {
                    self.stats.dequeued();
                }
            }
        }

        for index in 0..self.states.len() {
            let status = self.read_state(index).status;
            let settled = match status {
                TrackStatus::Running => {
                    self.stats.transcode_finished();
                    self.update_state(index, |s| {
                        s.mark_failed(TrackFailure::new(
                            FailureReason::CodecError,
                            "Worker terminated abnormally",
                        ))
                    })
                    .then_some(TrackStatus::Failed)
                }
                TrackStatus::Pending if cancelled => self
                    .update_state(index, |s| s.mark_cancelled())
                    .then_some(TrackStatus::Cancelled),
                TrackStatus::Pending => {
                    // The supervisor respawns dead workers while work is queued,
                    // so a pending track here was never handed to anyone.
                    error!(run_id = %self.id, index, "Track left pending after all workers exited");
                    self.update_state(index, |s| s.mark_cancelled())
                        .then_some(TrackStatus::Cancelled)
                }
                _ => None,
            };
            if let Some(status) = settled {
                self.stats.record(status);
                metrics::TRANSCODES_TOTAL
                    .with_label_values(&[status.as_str()])
                    .inc();
            }
        }

        let outcome = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        if self.outcome.set(outcome).is_err() {
            return;
        }

        let report = RunReport {
            run_id: self.id,
            tracks: self.snapshot(),
            was_cancelled: cancelled,
        };
        let summary = report.summary();
        info!(run_id = %self.id, outcome = outcome.as_str(), "Run finished: {}", summary);

        metrics::RUNS_FINISHED
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.stats.run_finished();

        self.emit(RunEvent::RunFinished {
            run_id: self.id,
            was_cancelled: cancelled,
            summary,
            overall_fraction: self.overall_fraction(),
        });
        self.done.send_replace(true);
    }
}

/// Handle to a started run.
///
/// Cheap to clone; every clone observes the same run.
#[derive(Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
}

impl RunHandle {
    pub(crate) fn new(shared: Arc<RunShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> RunId {
        self.shared.id()
    }

    /// Number of tracks in the run.
    pub fn track_count(&self) -> usize {
        self.shared.track_count()
    }

    pub fn profile(&self) -> QualityProfile {
        self.shared.profile()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.shared.concurrency_limit()
    }

    pub fn status(&self) -> RunStatus {
        self.shared.status()
    }

    /// Whether every track has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Requests cooperative cancellation.
    ///
    /// Pending tracks are cancelled before this returns; running tracks stop
    /// at their next progress checkpoint. Returns `false` if the run already
    /// finished or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Current progress. Never blocks on running transcodes.
    pub fn progress(&self) -> RunProgress {
        self.shared.progress()
    }

    /// The final report if the run has finished.
    pub fn report(&self) -> Option<RunReport> {
        self.shared.report()
    }

    /// Waits until every track is terminal and returns the final report.
    pub async fn wait(&self) -> RunReport {
        self.shared.wait().await
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.shared.id())
            .field("status", &self.shared.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("track-01"), "track-01");
        assert_eq!(sanitize_file_stem("a/b c"), "a_b_c");
        assert_eq!(sanitize_file_stem("../etc"), "_etc");
        assert_eq!(sanitize_file_stem(""), "track");
        assert_eq!(sanitize_file_stem("..."), "track");
    }

    #[test]
    fn test_output_paths_deduplicate() {
        let tracks = vec![
            TrackDescriptor::new("a b", "/m/1.wav"),
            TrackDescriptor::new("a_b", "/m/2.wav"),
            TrackDescriptor::new("c", "/m/3.wav"),
        ];
        let paths = output_paths(Path::new("/out"), &tracks);
        assert_eq!(paths[0], PathBuf::from("/out/a_b.mp3"));
        assert_eq!(paths[1], PathBuf::from("/out/a_b-2.mp3"));
        assert_eq!(paths[2], PathBuf::from("/out/c.mp3"));
    }

    #[test]
    fn test_cancel_before_dispatch() {
        let (events, _) = broadcast::channel(16);
        let run = RunShared::new(
            vec![
                TrackDescriptor::new("A", "/m/a.wav"),
                TrackDescriptor::new("B", "/m/b.wav"),
            ],
            QualityProfile::Default,
            1,
            Path::new("/out"),
            events,
            Arc::new(PoolStats::default()),
        );

        assert!(run.cancel());
        assert!(!run.cancel());
        assert_eq!(run.dispatch_next(), None);
        assert!(run
            .snapshot()
            .iter()
            .all(|s| s.status == TrackStatus::Cancelled));

        run.finish();
        let report = run.report().unwrap();
        assert!(report.was_cancelled);
        assert_eq!(run.progress().overall_fraction, 0.0);
    }

    #[test]
    fn test_dispatch_is_fifo() {
        let (events, _) = broadcast::channel(16);
        let tracks = (0..3)
            .map(|i| TrackDescriptor::new(format!("T{}", i), format!("/m/{}.wav", i)))
            .collect();
        let run = RunShared::new(
            tracks,
            QualityProfile::Default,
            2,
            Path::new("/out"),
            events,
            Arc::new(PoolStats::default()),
        );

        assert_eq!(run.dispatch_next(), Some(0));
        assert_eq!(run.dispatch_next(), Some(1));
        assert_eq!(run.dispatch_next(), Some(2));
        assert_eq!(run.dispatch_next(), None);
        assert_eq!(run.read_state(0).status, TrackStatus::Running);
    }

    #[test]
    fn test_finish_settles_orphaned_tracks() {
        let (events, _) = broadcast::channel(16);
        let run = RunShared::new(
            vec![
                TrackDescriptor::new("A", "/m/a.wav"),
                TrackDescriptor::new("B", "/m/b.wav"),
            ],
            QualityProfile::Default,
            1,
            Path::new("/out"),
            events,
            Arc::new(PoolStats::default()),
        );

        // A is handed out but its worker never reports back; B never leaves the queue.
        assert_eq!(run.dispatch_next(), Some(0));
        assert!(run.has_queued());
        run.finish();

        assert!(!run.has_queued());
        let report = run.report().unwrap();
        assert!(!report.was_cancelled);
        assert_eq!(report.tracks[0].status, TrackStatus::Failed);
        assert_eq!(
            report.tracks[0].error.as_ref().unwrap().reason,
            FailureReason::CodecError
        );
        let orphan = &report.tracks[1];
        assert_eq!(orphan.status, TrackStatus::Cancelled);
        assert!(orphan.started_at.is_none());
        assert!(orphan.error.is_none());
    }
}
