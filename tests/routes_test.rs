#![allow(clippy::expect_used)]

use std::path::PathBuf;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use unpossible_observer::config::ObserverConfig;
use unpossible_observer::routes::{AppState, router};
use unpossible_observer::supervisor::Supervisor;

fn project() -> (TempDir, AppState) {
    project_with_worker("exit 0\n")
}

fn project_with_worker(script: &str) -> (TempDir, AppState) {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("unpossible.sh"), script).expect("write worker script");
    let config = ObserverConfig {
        package_dir: dir.path().to_path_buf(),
        script_dir: dir.path().to_path_buf(),
        project_dir: dir.path().to_path_buf(),
        shell: PathBuf::from("bash"),
        port: 0,
    };
    let supervisor = Supervisor::spawn(config.clone());
    (dir, AppState::new(config, supervisor))
}

async fn send(state: &AppState, request: Request<Body>) -> Response {
    router(state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible")
}

async fn get(state: &AppState, uri: &str) -> Response {
    send(
        state,
        Request::get(uri).body(Body::empty()).expect("request"),
    )
    .await
}

async fn post(state: &AppState, uri: &str, body: &str) -> Response {
    send(
        state,
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
    )
    .await
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

#[tokio::test]
async fn state_starts_idle() {
    let (_dir, state) = project();
    let response = get(&state, "/api/state").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "idle");
    assert_eq!(body["iteration"], 0);
    assert_eq!(body["maxIterations"], 10);
    assert_eq!(body["output"], json!([]));
}

#[tokio::test]
async fn start_acknowledges_and_runs_worker() {
    let (_dir, state) = project_with_worker("echo \"args: $*\"\n");
    let response = post(&state, "/api/start", r#"{"args": ["--worker", "2"]}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"success": true}));

    let snapshot = state.supervisor.snapshot().await.expect("snapshot");
    assert!(snapshot.state.start_time.is_some());

    // The attach backlog replays whatever the worker printed before this.
    let mut viewer = state.supervisor.subscribe().await.expect("subscribe");
    let mut output = String::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(20), viewer.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("viewer stream ended");
        match frame.event {
            "output" => {
                let data: Value = serde_json::from_str(&frame.data).expect("JSON data");
                output.push_str(data["text"].as_str().expect("text"));
            }
            "exit" => break,
            _ => {}
        }
    }
    assert_eq!(output, "args: --worker 2\n");
    assert_eq!(output.matches("--worker").count(), 1);
}

#[tokio::test]
async fn start_with_empty_body_is_accepted() {
    let (_dir, state) = project();
    let response = post(&state, "/api/start", "").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_start_is_rejected_without_state_change() {
    let (_dir, state) = project();
    let response = post(&state, "/api/start", "{\"args\": oops").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());

    let snapshot = state.supervisor.snapshot().await.expect("snapshot");
    assert!(snapshot.state.start_time.is_none());
}

#[tokio::test]
async fn stop_always_succeeds() {
    let (_dir, state) = project();
    let response = post(&state, "/api/stop", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"success": true}));
}

#[tokio::test]
async fn prds_lists_only_readable_definitions() {
    let (dir, state) = project();
    std::fs::write(
        dir.path().join("auth.json"),
        r#"{"project": "auth", "branchName": "unpossible/auth"}"#,
    )
    .expect("write prd");
    std::fs::write(dir.path().join(".prd-files"), "auth.json\nmissing.json\n")
        .expect("write index");

    let response = get(&state, "/api/prds").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([{"file": "auth.json", "project": "auth", "branchName": "unpossible/auth"}])
    );
}

#[tokio::test]
async fn dashboard_served_from_package_dir() {
    let (dir, state) = project();
    assert_eq!(get(&state, "/").await.status(), StatusCode::NOT_FOUND);

    std::fs::create_dir(dir.path().join("observer")).expect("mkdir");
    std::fs::write(dir.path().join("observer/index.html"), "<h1>observer</h1>")
        .expect("write asset");

    for uri in ["/", "/index.html"] {
        let response = get(&state, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        assert_eq!(&bytes[..], b"<h1>observer</h1>");
    }
}

#[tokio::test]
async fn events_open_an_sse_stream() {
    let (_dir, state) = project();
    let response = get(&state, "/events").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let (_dir, state) = project();
    let response = get(&state, "/api/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
