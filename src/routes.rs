use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::config::{ObserverConfig, strip_worker_flag};
use crate::error::ObserverError;
use crate::prds::load_task_definitions;
use crate::session::state::SessionSnapshot;
use crate::supervisor::Supervisor;

/// Shared state for the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ObserverConfig>,
    pub supervisor: Supervisor,
}

impl AppState {
    pub fn new(config: ObserverConfig, supervisor: Supervisor) -> Self {
        Self {
            config: Arc::new(config),
            supervisor,
        }
    }
}

/// Body of `POST /api/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub args: Vec<String>,
}

impl StartRequest {
    /// Parse a start request; an empty body means no arguments.
    pub fn from_body(body: &[u8]) -> Result<Self, ObserverError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|err| ObserverError::BadRequest(err.to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/index.html", get(dashboard))
        .route("/events", get(stream_events))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/state", get(session_state))
        .route("/api/prds", get(task_definitions))
        .fallback(not_found)
        .with_state(state)
}

async fn dashboard(State(state): State<AppState>) -> Result<Html<String>, ObserverError> {
    let path = state.config.dashboard_asset();
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Ok(Html(html)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ObserverError::NotFound(path.display().to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

async fn stream_events(State(state): State<AppState>) -> Result<impl IntoResponse, ObserverError> {
    let viewer = state.supervisor.subscribe().await?;
    debug!(viewer = viewer.id(), "viewer connected");
    let stream = viewer.map(|frame| {
        Ok::<SseEvent, Infallible>(SseEvent::default().event(frame.event).data(frame.data))
    });

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    Ok(([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], sse))
}

async fn start(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ObserverError> {
    let request = StartRequest::from_body(&body)?;
    let args = strip_worker_flag(request.args);
    info!(?args, "start requested");
    state.supervisor.start(args)?;
    Ok(Json(json!({ "success": true })))
}

async fn stop(State(state): State<AppState>) -> Result<Json<Value>, ObserverError> {
    info!("stop requested");
    state.supervisor.stop().await?;
    Ok(Json(json!({ "success": true })))
}

async fn session_state(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, ObserverError> {
    Ok(Json(state.supervisor.snapshot().await?))
}

async fn task_definitions(State(state): State<AppState>) -> Json<Vec<Value>> {
    let config = &state.config;
    Json(load_task_definitions(&config.project_dir, &config.prd_index()).await)
}

async fn not_found() -> ObserverError {
    ObserverError::NotFound("route".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_means_no_args() {
        assert!(StartRequest::from_body(b"").unwrap().args.is_empty());
        assert!(StartRequest::from_body(b" \n").unwrap().args.is_empty());
        assert!(StartRequest::from_body(b"{}").unwrap().args.is_empty());
    }

    #[test]
    fn args_are_parsed() {
        let request = StartRequest::from_body(br#"{"args": ["5", "auth"]}"#).unwrap();
        assert_eq!(request.args, vec!["5", "auth"]);
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        let bodies: [&[u8]; 3] = [b"{not json", br#"{"args": [1, 2]}"#, br#"{"args": "5"}"#];
        for body in bodies {
            assert!(matches!(
                StartRequest::from_body(body),
                Err(ObserverError::BadRequest(_))
            ));
        }
    }
}
