//! Mock transcoder for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

use crate::transcoder::{
    ProgressReporter, TranscodeError, TranscodeJob, TranscodeOutput, Transcoder,
};

/// Decrements the active counter even if the transcode panics.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of the Transcoder trait.
///
/// Provides controllable behavior for testing:
/// - Record jobs in the order they were handed to the transcoder
/// - Fail or panic for specific source paths
/// - Hold every transcode at a gate until resumed
/// - Measure the highest number of simultaneous transcodes
///
/// Clones share all state, so a test can keep one clone while the
/// coordinator owns another.
///
/// # Example
///
/// ```rust,ignore
/// use mp3disc_core::testing::{fixtures, MockTranscoder};
///
/// let transcoder = MockTranscoder::new();
/// transcoder
///     .fail_source("/music/T02.wav", TranscodeError::codec_failed("bad frame", None))
///     .await;
///
/// // Hand `transcoder.clone()` to a coordinator and run...
///
/// assert!(transcoder.max_concurrent() <= 2);
/// ```
#[derive(Debug, Clone)]
pub struct MockTranscoder {
    /// Jobs in the order they were received.
    jobs: Arc<RwLock<Vec<TranscodeJob>>>,
    /// Errors returned for specific sources, halfway through.
    failures: Arc<RwLock<HashMap<PathBuf, TranscodeError>>>,
    /// Sources whose transcode panics.
    panics: Arc<RwLock<HashSet<PathBuf>>>,
    /// Number of progress steps per transcode.
    steps: Arc<RwLock<u32>>,
    /// Delay before each progress step.
    step_duration_ms: Arc<RwLock<u64>>,
    /// Size of the output written on success.
    output_size: Arc<RwLock<u64>>,
    /// Level reported on success.
    level_db: Arc<RwLock<Option<f64>>>,
    /// Whether successful transcodes write a file to the destination.
    write_output: Arc<RwLock<bool>>,
    /// Open while `true`; transcodes wait here before doing any work.
    gate: Arc<watch::Sender<bool>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscoder {
    /// Create a new mock transcoder.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            panics: Arc::new(RwLock::new(HashSet::new())),
            steps: Arc::new(RwLock::new(4)),
            step_duration_ms: Arc::new(RwLock::new(5)),
            output_size: Arc::new(RwLock::new(4096)),
            level_db: Arc::new(RwLock::new(Some(-18.0))),
            write_output: Arc::new(RwLock::new(true)),
            gate: Arc::new(gate),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get all recorded jobs, in the order they were received.
    pub async fn recorded_jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.read().await.clone()
    }

    /// Track ids in the order they were received.
    pub async fn dispatch_order(&self) -> Vec<String> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|j| j.track_id.clone())
            .collect()
    }

    /// Get the number of transcodes started.
    pub async fn transcode_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Fail transcodes of `source` with `error` halfway through.
    pub async fn fail_source(&self, source: impl AsRef<Path>, error: TranscodeError) {
        self.failures
            .write()
            .await
            .insert(source.as_ref().to_path_buf(), error);
    }

    /// Panic when asked to transcode `source`.
    pub async fn panic_on_source(&self, source: impl AsRef<Path>) {
        self.panics
            .write()
            .await
            .insert(source.as_ref().to_path_buf());
    }

    /// Set the number of progress steps and the delay before each one.
    pub async fn set_steps(&self, steps: u32, step_duration: Duration) {
        *self.steps.write().await = steps.max(1);
        *self.step_duration_ms.write().await = step_duration.as_millis() as u64;
    }

    /// Set the size of successful outputs. Zero simulates an empty file.
    pub async fn set_output_size(&self, size: u64) {
        *self.output_size.write().await = size;
    }

    /// Set the level reported on success.
    pub async fn set_level(&self, level_db: Option<f64>) {
        *self.level_db.write().await = level_db;
    }

    /// Enable or disable writing output files.
    pub async fn set_write_output(&self, write: bool) {
        *self.write_output.write().await = write;
    }

    /// Hold every transcode before its first step until [`Self::resume`].
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Release paused transcodes.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Transcodes currently in progress.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous transcodes observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Waits for the gate to open. Returns `false` if cancelled first.
    async fn wait_for_gate(&self, progress: &ProgressReporter) -> bool {
        let mut gate = self.gate.subscribe();
        loop {
            let open = *gate.borrow_and_update();
            if open {
                return true;
            }
            tokio::select! {
                _ = progress.cancelled() => return false,
                changed = gate.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    async fn run(
        &self,
        job: &TranscodeJob,
        progress: &ProgressReporter,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let start = Instant::now();
        job.ensure_supported_kind()?;

        if self.panics.read().await.contains(&job.source_path) {
            panic!("mock transcoder panic for {:?}", job.source_path);
        }

        if !self.wait_for_gate(progress).await {
            return Err(TranscodeError::Cancelled);
        }

        let steps = *self.steps.read().await;
        let step = Duration::from_millis(*self.step_duration_ms.read().await);
        let failure = self.failures.read().await.get(&job.source_path).cloned();

        for i in 1..=steps {
            tokio::select! {
                _ = progress.cancelled() => return Err(TranscodeError::Cancelled),
                _ = tokio::time::sleep(step) => {}
            }

            if let Some(ref err) = failure {
                if i * 2 >= steps {
                    return Err(err.clone());
                }
            }

            if !progress.report(i as f64 / steps as f64) {
                return Err(TranscodeError::Cancelled);
            }
        }

        let size = *self.output_size.read().await;
        if *self.write_output.read().await {
            if let Some(parent) = job.destination_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TranscodeError::destination_write(parent, e))?;
            }
            tokio::fs::write(&job.destination_path, vec![0u8; size as usize])
                .await
                .map_err(|e| TranscodeError::destination_write(&job.destination_path, e))?;
        }

        Ok(TranscodeOutput {
            track_id: job.track_id.clone(),
            output_path: job.destination_path.clone(),
            output_size_bytes: size,
            level_db: *self.level_db.read().await,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcode(
        &self,
        job: TranscodeJob,
        progress: ProgressReporter,
    ) -> Result<TranscodeOutput, TranscodeError> {
        self.jobs.write().await.push(job.clone());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));

        self.run(&job, &progress).await
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        Ok(())
    }
}
