use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use mp3disc_core::{Config, CoordinatorStatus, QualityProfile, TrackKind};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config().clone())
}

/// One selectable quality profile.
#[derive(Debug, Serialize)]
pub struct ProfileInfo {
    pub name: &'static str,
    pub label: String,
}

/// What the configured transcoder accepts and produces.
#[derive(Debug, Serialize)]
pub struct TranscoderInfoResponse {
    pub name: String,
    pub supported_kinds: Vec<TrackKind>,
    pub profiles: Vec<ProfileInfo>,
    pub default_profile: QualityProfile,
    pub default_concurrency: usize,
}

pub async fn get_transcoder_info(State(state): State<Arc<AppState>>) -> Json<TranscoderInfoResponse> {
    let coordinator = state.coordinator();
    let config = coordinator.config();

    Json(TranscoderInfoResponse {
        name: coordinator.transcoder().name().to_string(),
        supported_kinds: coordinator.transcoder().supported_kinds().to_vec(),
        profiles: QualityProfile::ALL
            .iter()
            .map(|p| ProfileInfo {
                name: p.as_str(),
                label: p.label(),
            })
            .collect(),
        default_profile: config.default_quality,
        default_concurrency: config.max_concurrent_transcodes,
    })
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<CoordinatorStatus> {
    Json(state.coordinator().status().await)
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
