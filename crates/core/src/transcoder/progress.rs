//! Progress reporting and cooperative cancellation for a single transcode.

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

/// Channel from a running transcode back to whoever supervises it.
///
/// `report` forwards a fraction in `[0.0, 1.0]` and returns whether the
/// transcode should keep going. Once the token is cancelled it returns
/// `false`, and the transcoder must stop at its next safe checkpoint, discard
/// partial output and fail with [`super::TranscodeError::Cancelled`].
#[derive(Clone)]
pub struct ProgressReporter {
    cancel: CancellationToken,
    sink: Option<ProgressSink>,
}

impl ProgressReporter {
    /// Creates a reporter that forwards fractions to `sink`.
    pub fn new(cancel: CancellationToken, sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            cancel,
            sink: Some(Arc::new(sink)),
        }
    }

    /// Creates a reporter that only carries a cancellation token.
    pub fn silent(cancel: CancellationToken) -> Self {
        Self { cancel, sink: None }
    }

    /// Reports progress and returns `true` to continue, `false` to stop.
    pub fn report(&self, fraction: f64) -> bool {
        if let Some(ref sink) = self.sink {
            let fraction = if fraction.is_finite() {
                fraction.clamp(0.0, 1.0)
            } else {
                0.0
            };
            sink(fraction);
        }
        !self.cancel.is_cancelled()
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
