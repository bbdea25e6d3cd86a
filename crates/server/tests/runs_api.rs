//! Run endpoint tests against an in-process router.

#[macro_use]
mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;
use mp3disc_core::RunEvent;
use mp3disc_server::api::WsMessage;

#[tokio::test]
async fn test_create_run_and_wait_for_report() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({
                "tracks": [
                    { "id": "A", "path": "/music/A.wav", "title": "First" },
                    { "id": "B", "path": "/music/B.m4a" },
                    { "id": "C", "path": "/music/C.aiff" }
                ]
            }),
        )
        .await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["profile"], "vbr_190");
    assert_eq!(response.body["concurrency_limit"], 2);
    assert_eq!(response.body["tracks"].as_array().unwrap().len(), 3);

    let run_id = response.body["run_id"].as_str().unwrap().to_string();
    let report = fixture
        .get(&format!("/api/v1/runs/{}/report?wait=true", run_id))
        .await;

    assert_status!(report, StatusCode::OK);
    assert_eq!(report.body["was_cancelled"], false);
    assert_eq!(report.body["summary"]["succeeded"], 3);
    let tracks = report.body["tracks"].as_array().unwrap();
    let ids: Vec<&str> = tracks
        .iter()
        .map(|t| t["track_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    for track in tracks {
        assert_eq!(track["status"], "succeeded");
        assert_eq!(track["fraction_done"], 1.0);
        assert!(track.get("error").is_none());
    }
    assert!(fixture.output_dir().join("A.mp3").exists());
}

#[tokio::test]
async fn test_request_overrides_defaults() {
    let fixture = TestFixture::new().await;
    let custom_dir = fixture.temp_dir.path().join("custom");

    let run_id = fixture
        .start_run(
            &["A", "B"],
            json!({
                "quality": "cbr_128",
                "concurrency": 1,
                "output_dir": custom_dir
            }),
        )
        .await;

    let progress = fixture.wait_finished(&run_id).await;
    assert_eq!(progress["profile"], "cbr_128");
    assert_eq!(progress["concurrency_limit"], 1);
    assert_eq!(progress["status"], "completed");
    assert!(custom_dir.join("A.mp3").exists());
    assert_eq!(fixture.transcoder.max_concurrent(), 1);
}

#[tokio::test]
async fn test_invalid_input_rejected() {
    let fixture = TestFixture::new().await;

    let empty = fixture.post("/api/v1/runs", json!({ "tracks": [] })).await;
    assert_status!(empty, StatusCode::BAD_REQUEST);
    assert_eq!(empty.body["code"], "invalid_input");

    let zero = fixture
        .post(
            "/api/v1/runs",
            json!({ "tracks": [{ "id": "A", "path": "/music/A.wav" }], "concurrency": 0 }),
        )
        .await;
    assert_status!(zero, StatusCode::BAD_REQUEST);
    assert_eq!(zero.body["code"], "invalid_input");

    let quality = fixture
        .post(
            "/api/v1/runs",
            json!({ "tracks": [{ "id": "A", "path": "/music/A.wav" }], "quality": "lossless" }),
        )
        .await;
    assert_status!(quality, StatusCode::BAD_REQUEST);
    assert_eq!(quality.body["code"], "invalid_input");

    let malformed = fixture.post_raw("/api/v1/runs", "{ not json").await;
    assert!(malformed.status.is_client_error());

    // Nothing was started.
    assert_eq!(fixture.transcoder.transcode_count().await, 0);
    let list = fixture.get("/api/v1/runs").await;
    assert_eq!(list.body["total"], 0);
}

#[tokio::test]
async fn test_unsupported_track_fails_alone() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({
                "tracks": [
                    { "id": "A", "path": "/music/A.wav" },
                    { "id": "B", "path": "/music/B.wma" }
                ]
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    let run_id = response.body["run_id"].as_str().unwrap().to_string();

    let report = fixture
        .get(&format!("/api/v1/runs/{}/report?wait=true", run_id))
        .await;
    let tracks = report.body["tracks"].as_array().unwrap();
    assert_eq!(tracks[0]["status"], "succeeded");
    assert_eq!(tracks[1]["status"], "failed");
    assert_eq!(tracks[1]["error"]["reason"], "unsupported_format");
    assert!(tracks[1].get("output_path").is_none());
    assert_eq!(report.body["summary"]["failures_by_reason"]["unsupported_format"], 1);
}

#[tokio::test]
async fn test_explicit_unknown_kind_is_not_inferred() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/runs",
            json!({
                "tracks": [
                    { "id": "A", "path": "/music/A.wav" },
                    { "id": "B", "path": "/music/B.wav", "kind": "unknown" }
                ]
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    let run_id = response.body["run_id"].as_str().unwrap().to_string();

    let report = fixture
        .get(&format!("/api/v1/runs/{}/report?wait=true", run_id))
        .await;
    let tracks = report.body["tracks"].as_array().unwrap();
    assert_eq!(tracks[0]["status"], "succeeded");
    assert_eq!(tracks[1]["status"], "failed");
    assert_eq!(tracks[1]["error"]["reason"], "unsupported_format");
    assert!(!fixture.output_dir().join("B.mp3").exists());
}

#[tokio::test]
async fn test_unknown_and_malformed_run_ids() {
    let fixture = TestFixture::new().await;
    let missing = uuid::Uuid::new_v4();

    let not_found = fixture.get(&format!("/api/v1/runs/{}", missing)).await;
    assert_status!(not_found, StatusCode::NOT_FOUND);
    assert_eq!(not_found.body["code"], "not_found");

    let cancel = fixture
        .post_empty(&format!("/api/v1/runs/{}/cancel", missing))
        .await;
    assert_status!(cancel, StatusCode::NOT_FOUND);

    let garbage = fixture.get("/api/v1/runs/not-a-run").await;
    assert_status!(garbage, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_running_run() {
    let fixture = TestFixture::new().await;
    fixture.transcoder.pause();

    let run_id = fixture.start_run(&["A", "B", "C"], json!({})).await;

    let early = fixture
        .get(&format!("/api/v1/runs/{}/report", run_id))
        .await;
    assert_status!(early, StatusCode::CONFLICT);
    assert_eq!(early.body["code"], "run_still_active");

    let cancel = fixture
        .post_empty(&format!("/api/v1/runs/{}/cancel", run_id))
        .await;
    assert_status!(cancel, StatusCode::OK);
    assert_eq!(cancel.body["cancelled"], true);

    let report = fixture
        .get(&format!("/api/v1/runs/{}/report?wait=true", run_id))
        .await;
    assert_status!(report, StatusCode::OK);
    assert_eq!(report.body["was_cancelled"], true);
    assert_eq!(report.body["summary"]["cancelled"], 3);

    // Cancelling again is a no-op.
    let again = fixture
        .post_empty(&format!("/api/v1/runs/{}/cancel", run_id))
        .await;
    assert_status!(again, StatusCode::OK);
    assert_eq!(again.body["cancelled"], false);

    let progress = fixture.get(&format!("/api/v1/runs/{}", run_id)).await;
    assert_eq!(progress.body["status"], "cancelled");
    fixture.transcoder.resume();
}

#[tokio::test]
async fn test_delete_only_finished_runs() {
    let fixture = TestFixture::new().await;
    fixture.transcoder.pause();

    let run_id = fixture.start_run(&["A"], json!({})).await;

    let busy = fixture.delete(&format!("/api/v1/runs/{}", run_id)).await;
    assert_status!(busy, StatusCode::CONFLICT);

    fixture.transcoder.resume();
    fixture.wait_finished(&run_id).await;

    let deleted = fixture.delete(&format!("/api/v1/runs/{}", run_id)).await;
    assert_status!(deleted, StatusCode::NO_CONTENT);

    let gone = fixture.get(&format!("/api/v1/runs/{}", run_id)).await;
    assert_status!(gone, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_runs_oldest_first() {
    let fixture = TestFixture::new().await;

    let first = fixture.start_run(&["A"], json!({})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = fixture.start_run(&["B", "C"], json!({})).await;

    let list = fixture.get("/api/v1/runs").await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["total"], 2);
    assert_eq!(list.body["runs"][0]["run_id"], first.as_str());
    assert_eq!(list.body["runs"][1]["run_id"], second.as_str());
}

#[tokio::test]
async fn test_transcoder_info_and_status() {
    let fixture = TestFixture::with_concurrency(3).await;

    let info = fixture.get("/api/v1/transcoder").await;
    assert_status!(info, StatusCode::OK);
    assert_eq!(info.body["name"], "mock");
    assert_eq!(info.body["default_concurrency"], 3);
    assert_eq!(info.body["default_profile"], "vbr_190");
    assert_eq!(info.body["profiles"].as_array().unwrap().len(), 13);
    assert_eq!(info.body["supported_kinds"].as_array().unwrap().len(), 4);

    let run_id = fixture.start_run(&["A", "B"], json!({})).await;
    fixture
        .get(&format!("/api/v1/runs/{}/report?wait=true", run_id))
        .await;

    let status = fixture.get("/api/v1/status").await;
    assert_status!(status, StatusCode::OK);
    assert_eq!(status.body["transcoder"], "mock");
    assert_eq!(status.body["registered_runs"], 1);
    assert_eq!(status.body["active_runs"], 0);
    assert_eq!(status.body["total_succeeded"], 2);
}

#[tokio::test]
async fn test_health_config_and_metrics() {
    let fixture = TestFixture::new().await;

    let health = fixture.get("/api/v1/health").await;
    assert_status!(health, StatusCode::OK);
    assert_eq!(health.body["status"], "ok");

    let config = fixture.get("/api/v1/config").await;
    assert_status!(config, StatusCode::OK);
    assert_eq!(config.body["coordinator"]["max_concurrent_transcodes"], 2);
    assert_eq!(config.body["coordinator"]["default_quality"], "vbr_190");

    let metrics = fixture.get("/metrics").await;
    assert_status!(metrics, StatusCode::OK);
    let text = metrics.body.as_str().unwrap();
    assert!(text.contains("mp3disc_http_requests_total"));
    assert!(text.contains("mp3disc_transcode_pool_active"));
}

#[tokio::test]
async fn test_events_reach_websocket_broadcaster() {
    let fixture = TestFixture::new().await;
    let mut rx = fixture.broadcaster.subscribe();

    let run_id = fixture.start_run(&["A", "B"], json!({})).await;

    let mut kinds = Vec::new();
    let collected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let WsMessage::Run { event } = rx.recv().await.unwrap() else {
                continue;
            };
            assert_eq!(event.run_id().to_string(), run_id);
            let done = matches!(event, RunEvent::RunFinished { .. });
            kinds.push(event);
            if done {
                break;
            }
        }
    })
    .await;

    assert!(collected.is_ok(), "run events did not arrive");
    assert!(matches!(kinds.first(), Some(RunEvent::RunStarted { .. })));
    let finished = kinds
        .iter()
        .filter(|e| matches!(e, RunEvent::TrackFinished { .. }))
        .count();
    assert_eq!(finished, 2);
    match kinds.last() {
        Some(RunEvent::RunFinished {
            was_cancelled,
            summary,
            overall_fraction,
            ..
        }) => {
            assert!(!was_cancelled);
            assert_eq!(summary.succeeded, 2);
            assert_eq!(*overall_fraction, 1.0);
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}
