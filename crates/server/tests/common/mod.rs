//! Common test utilities for in-process API testing.
//!
//! Builds the real router around a coordinator backed by the
//! `MockTranscoder`, so run endpoints can be exercised without ffmpeg.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use mp3disc_core::{
    testing::MockTranscoder, Config, CoordinatorConfig, QualityProfile, ServerConfig,
    TranscodeCoordinator,
};
use mp3disc_server::api::{create_router, spawn_event_forwarder, WsBroadcaster};
use mp3disc_server::state::AppState;

/// Re-export fixtures for test convenience
pub use mp3disc_core::testing::fixtures;

/// Test fixture for API testing with a mock transcoder.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_run_creation() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/runs", json!({
///         "tracks": [{ "id": "T01", "path": "/music/a.wav" }]
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock transcoder shared with the coordinator
    pub transcoder: MockTranscoder,
    /// The coordinator behind the router
    pub coordinator: Arc<TranscodeCoordinator>,
    /// Broadcaster fed by the coordinator's events
    pub broadcaster: WsBroadcaster,
    /// Temporary directory holding run output
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default settings.
    pub async fn new() -> Self {
        Self::with_concurrency(2).await
    }

    /// Create a test fixture whose runs default to `concurrency` workers.
    pub async fn with_concurrency(concurrency: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let coordinator_config = CoordinatorConfig::default()
            .with_max_concurrent(concurrency)
            .with_output_dir(temp_dir.path().join("output"))
            .with_default_quality(QualityProfile::Vbr190);

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            coordinator: coordinator_config.clone(),
            ..Default::default()
        };

        let transcoder = MockTranscoder::new();
        let coordinator = Arc::new(TranscodeCoordinator::new(
            coordinator_config,
            transcoder.clone(),
        ));

        let broadcaster = WsBroadcaster::default();
        spawn_event_forwarder(&coordinator, broadcaster.clone());

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&coordinator),
            broadcaster.clone(),
        ));
        let router = create_router(state);

        Self {
            router,
            transcoder,
            coordinator,
            broadcaster,
            temp_dir,
        }
    }

    /// Output directory runs default to.
    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("output")
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Start a run over `ids` and return its id.
    pub async fn start_run(&self, ids: &[&str], extra: Value) -> String {
        let tracks: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "id": id, "path": format!("/music/{}.wav", id) }))
            .collect();
        let mut body = json!({ "tracks": tracks });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                body.insert(k.clone(), v.clone());
            }
        }

        let response = self.post("/api/v1/runs", body).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["run_id"]
            .as_str()
            .expect("run_id missing")
            .to_string()
    }

    /// Poll a run until its status is no longer `running`.
    pub async fn wait_finished(&self, run_id: &str) -> Value {
        for _ in 0..400 {
            let response = self.get(&format!("/api/v1/runs/{}", run_id)).await;
            if response.body["status"] != "running" {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} did not finish", run_id);
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
