use agent_core::AgentConfig;
use agent_server::http::router;
use agent_server::{AgentState, ControlServer};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    dir: tempfile::TempDir,
    server: Arc<ControlServer>,
    app: Router,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::default();
    config.paths.job_log = dir.path().join("job_log.json");
    config.paths.agent_log = dir.path().join("agent_log");
    config.paths.work_dir = dir.path().join("work");
    config.teardown.archive_poll_interval_ms = 10;
    config.callbacks.max_attempts = 3;
    config.callbacks.retry_delay_ms = 10;

    let server = ControlServer::new(config);
    let app = router(Arc::clone(&server));
    Harness { dir, server, app }
}

async fn control_plane() -> MockServer {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;
    mock
}

async fn bodies(mock: &MockServer, path: &str) -> Vec<Value> {
    mock.received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

fn job_body(mock: &MockServer, commands: &[&str], logger: Value) -> String {
    json!({
        "id": "job-1",
        "commands": commands.iter().map(|c| json!({"directive": c})).collect::<Vec<_>>(),
        "callbacks": {
            "finished": format!("{}/finished", mock.uri()),
            "teardown_finished": format!("{}/teardown_finished", mock.uri()),
        },
        "logger": logger,
    })
    .to_string()
}

fn push_logger(mock: &MockServer) -> Value {
    json!({"method": "push", "url": format!("{}/logs", mock.uri()), "token": "t"})
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(body.into())
        .unwrap()
}

async fn wait_for_state(server: &ControlServer, expected: AgentState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while server.state().await != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("agent did not reach expected state");
}

#[tokio::test]
async fn status_reports_state_and_version() {
    let h = harness();

    let (status, _, body) = send(&h.app, get("/status")).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["state"], "waiting-for-job");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn submitted_job_runs_and_reports_callbacks() {
    let h = harness();
    let mock = control_plane().await;

    let body = job_body(&mock, &["echo hello"], push_logger(&mock));
    let (status, _, response) = send(&h.app, post("/jobs", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Value>(&response).unwrap()["job_id"],
        "job-1"
    );

    wait_for_state(&h.server, AgentState::WaitingForJob).await;

    assert_eq!(
        bodies(&mock, "/finished").await,
        vec![json!({"result": "passed"})]
    );
    assert_eq!(bodies(&mock, "/teardown_finished").await, vec![json!({})]);

    let logs = mock
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/logs")
        .map(|r| String::from_utf8(r.body).unwrap())
        .collect::<String>();
    assert!(logs.contains("\"event\":\"job_started\""));
    assert!(logs.contains("hello"));
    assert!(logs.contains("\"result\":\"passed\""));
}

#[tokio::test]
async fn second_job_is_rejected_while_busy() {
    let h = harness();
    let mock = control_plane().await;

    // Pull logger: teardown holds the slot until the archiver pulls the log.
    let body = job_body(&mock, &["true"], json!({"method": "pull"}));
    let (status, _, _) = send(&h.app, post("/jobs", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.server.state().await, AgentState::JobStarted);

    let (status, _, response) = send(&h.app, post("/jobs", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        serde_json::from_str::<Value>(&response).unwrap(),
        json!({"message": "a job is already running"})
    );
    assert_eq!(h.server.state().await, AgentState::JobStarted);
    let active = h.server.slot().active().await.unwrap();
    assert_eq!(active.id().0, "job-1");

    // Give teardown time to reach the archival wait, then release it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let request = Request::builder()
        .uri("/job_logs")
        .header("X-Client-Name", "archivator")
        .body(Body::empty())
        .unwrap();
    let (status, _, log) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(log.contains("\"event\":\"job_started\""));

    wait_for_state(&h.server, AgentState::WaitingForJob).await;
    assert!(active.is_log_archived());
    assert_eq!(bodies(&mock, "/teardown_finished").await.len(), 1);
}

#[tokio::test]
async fn malformed_request_rolls_back_state() {
    let h = harness();

    let (status, _, body) = send(&h.app, post("/jobs", "not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert!(json["message"].as_str().unwrap().contains("Invalid job request"));
    assert_eq!(h.server.state().await, AgentState::WaitingForJob);

    let (status, _, _) = send(&h.app, post("/jobs", r#"{"logger": {"method": "push"}}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.server.state().await, AgentState::WaitingForJob);
    assert!(h.server.slot().active().await.is_none());

    let (status, _, _) = send(&h.app, post("/jobs", r#"{"id": ".."}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.server.state().await, AgentState::WaitingForJob);
}

#[tokio::test]
async fn stop_reports_stopped_once() {
    let h = harness();
    let mock = control_plane().await;

    let body = job_body(&mock, &["sleep 30", "echo never"], push_logger(&mock));
    let (status, _, _) = send(&h.app, post("/jobs", body)).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let (status, _, _) = send(&h.app, post("/stop", Body::empty())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&h.app, post("/jobs/terminate", Body::empty())).await;
    assert_eq!(status, StatusCode::OK);

    wait_for_state(&h.server, AgentState::WaitingForJob).await;

    assert_eq!(
        bodies(&mock, "/finished").await,
        vec![json!({"result": "stopped"})]
    );
    assert_eq!(bodies(&mock, "/teardown_finished").await, vec![json!({})]);
}

#[tokio::test]
async fn stop_without_job_is_a_noop() {
    let h = harness();

    let (status, _, _) = send(&h.app, post("/stop", Body::empty())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.server.state().await, AgentState::WaitingForJob);
}

#[tokio::test]
async fn job_logs_serve_from_offset() {
    let h = harness();

    let (status, _, _) = send(&h.app, get("/job_logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(h.dir.path().join("job_log.json"), "a\nb\nc\n").unwrap();

    let (status, content_type, body) = send(&h.app, get("/job_logs?start_from=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain"));
    assert_eq!(body, "b\nc\n");

    let (_, _, body) = send(&h.app, get("/job_logs?start_from=nope")).await;
    assert_eq!(body, "a\nb\nc\n");

    let (_, _, body) = send(&h.app, get("/jobs/job-1/log?start_from=2")).await;
    assert_eq!(body, "c\n");

    let (_, _, body) = send(&h.app, get("/job_logs?start_from=9")).await;
    assert_eq!(body, "");
}

#[tokio::test]
async fn push_job_has_no_local_log() {
    let h = harness();
    let mock = control_plane().await;
    std::fs::write(h.dir.path().join("job_log.json"), "previous job\n").unwrap();

    let body = job_body(&mock, &["sleep 30"], push_logger(&mock));
    let (status, _, _) = send(&h.app, post("/jobs", body)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&h.app, get("/job_logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!body.contains("previous job"));

    let (status, _, _) = send(&h.app, post("/stop", Body::empty())).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_state(&h.server, AgentState::WaitingForJob).await;
}

#[tokio::test]
async fn agent_logs_are_served_raw() {
    let h = harness();

    let (status, _, _) = send(&h.app, get("/agent_logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::write(h.dir.path().join("agent_log"), "line one\npartial").unwrap();

    let (status, content_type, body) = send(&h.app, get("/agent_logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain"));
    assert_eq!(body, "line one\npartial");
}
