//! Run API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mp3disc_core::{
    CoordinatorError, QualityProfile, RunHandle, RunId, RunProgress, RunReport, RunSummary,
    TrackDescriptor, TrackKind,
};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// One track as submitted by a client
#[derive(Debug, Deserialize)]
pub struct TrackBody {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub duration_secs: f64,
    /// Inferred from the path extension when absent. An explicit `unknown`
    /// is kept and fails the track as unsupported.
    pub kind: Option<TrackKind>,
    #[serde(default)]
    pub size_bytes: u64,
}

impl From<TrackBody> for TrackDescriptor {
    fn from(body: TrackBody) -> Self {
        let kind = body.kind.unwrap_or_else(|| TrackKind::from_path(&body.path));
        TrackDescriptor {
            id: body.id,
            path: body.path,
            title: body.title,
            album: body.album,
            artist: body.artist,
            duration_secs: body.duration_secs,
            kind,
            size_bytes: body.size_bytes,
        }
    }
}

/// Request body for starting a run
#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    /// Tracks in burn order
    pub tracks: Vec<TrackBody>,
    /// Quality profile name (e.g. "vbr_190"); configured default when absent
    pub quality: Option<String>,
    /// Pool size; configured default when absent
    pub concurrency: Option<usize>,
    /// Output directory; configured default when absent
    pub output_dir: Option<PathBuf>,
}

/// Query parameters for fetching a report
#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    /// Block until the run finishes
    #[serde(default)]
    pub wait: bool,
}

/// Response for listing runs
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunProgress>,
    pub total: usize,
}

/// Response for cancelling a run
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: RunId,
    /// False when the run had already finished or was already cancelled
    pub cancelled: bool,
}

/// Final report with its summary
#[derive(Debug, Serialize)]
pub struct RunReportResponse {
    #[serde(flatten)]
    pub report: RunReport,
    pub summary: RunSummary,
}

impl From<RunReport> for RunReportResponse {
    fn from(report: RunReport) -> Self {
        let summary = report.summary();
        Self { report, summary }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct RunErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Errors returned by the run endpoints.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_input",
            message: message.into(),
        }
    }

    fn still_running(id: RunId) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "run_still_active",
            message: format!("Run is still active: {}", id),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let (status, code) = match err {
            CoordinatorError::EmptyTrackList | CoordinatorError::InvalidConcurrencyLimit(_) => {
                (StatusCode::BAD_REQUEST, "invalid_input")
            }
            CoordinatorError::RunNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoordinatorError::RunStillActive(_) => (StatusCode::CONFLICT, "run_still_active"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(RunErrorResponse {
                error: self.message,
                code: self.code,
            }),
        )
            .into_response()
    }
}

fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid_input(format!("Invalid run id: {}", raw)))
}

async fn lookup(state: &AppState, raw: &str) -> Result<RunHandle, ApiError> {
    let id = parse_run_id(raw)?;
    Ok(state.coordinator().get_run(id).await?)
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a new run
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRunBody>,
) -> Result<(StatusCode, Json<RunProgress>), ApiError> {
    let profile = body
        .quality
        .as_deref()
        .map(str::parse::<QualityProfile>)
        .transpose()
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    let tracks = body.tracks.into_iter().map(TrackDescriptor::from).collect();

    let handle = state
        .coordinator()
        .start_with_defaults(tracks, profile, body.concurrency, body.output_dir)
        .await?;

    info!(run_id = %handle.id(), "Run created via API");
    Ok((StatusCode::CREATED, Json(handle.progress())))
}

/// List every registered run, oldest first
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<ListRunsResponse> {
    let runs: Vec<RunProgress> = state
        .coordinator()
        .runs()
        .await
        .iter()
        .map(RunHandle::progress)
        .collect();
    let total = runs.len();
    Json(ListRunsResponse { runs, total })
}

/// Progress snapshot of one run
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunProgress>, ApiError> {
    let handle = lookup(&state, &id).await?;
    Ok(Json(handle.progress()))
}

/// Request cancellation of a run
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelRunResponse>, ApiError> {
    let handle = lookup(&state, &id).await?;
    let cancelled = handle.cancel();
    info!(run_id = %handle.id(), cancelled, "Run cancel requested via API");
    Ok(Json(CancelRunResponse {
        run_id: handle.id(),
        cancelled,
    }))
}

/// Final report of a run. With `?wait=true`, blocks until it finishes.
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ReportParams>,
) -> Result<Json<RunReportResponse>, ApiError> {
    let handle = lookup(&state, &id).await?;
    let report = if params.wait {
        handle.wait().await
    } else {
        handle.report().ok_or_else(|| ApiError::still_running(handle.id()))?
    };
    Ok(Json(report.into()))
}

/// Drop a finished run from the registry
pub async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_run_id(&id)?;
    state.coordinator().forget(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
