use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use agent_core::request::LoggerMethod;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::server::ControlServer;
use crate::state::AgentState;

/// Client name the log archiver sends in `X-Client-Name`.
pub const ARCHIVATOR_CLIENT: &str = "archivator";

/// Build the control router.
///
/// Routes:
/// - GET /status - Agent state and version
/// - POST /jobs - Submit a job
/// - POST /stop, /jobs/terminate - Stop the active job
/// - GET /job_logs, /jobs/{job_id}/log - Job log from a line offset
/// - GET /agent_logs - Agent process log
pub fn router(server: Arc<ControlServer>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/jobs", post(submit_job))
        .route("/stop", post(stop_job))
        .route("/jobs/terminate", post(stop_job))
        .route("/job_logs", get(job_logs))
        .route("/jobs/{job_id}/log", get(job_logs))
        .route("/agent_logs", get(agent_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: AgentState,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /status
async fn status(State(server): State<Arc<ControlServer>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: server.state().await,
        version: server.version().to_string(),
    })
}

/// POST /jobs
async fn submit_job(
    State(server): State<Arc<ControlServer>>,
    body: Bytes,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let job_id = server.submit(&body).await?;
    Ok(Json(SubmitJobResponse {
        job_id: job_id.to_string(),
    }))
}

/// POST /stop
async fn stop_job(State(server): State<Arc<ControlServer>>) -> StatusCode {
    server.stop().await;
    StatusCode::OK
}

/// GET /job_logs?start_from=N
async fn job_logs(
    State(server): State<Arc<ControlServer>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let start_from = params
        .get("start_from")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    // Push jobs never write the local job log; what is there is stale.
    if let Some(job) = server.slot().active().await {
        if job.request().logger.method == LoggerMethod::Push {
            return Err(ApiError::NotFound(format!("local log of push job {}", job.id())));
        }
    }

    let contents = read_log(&server.config().paths.job_log).await?;
    let body = lines_from(&contents, start_from);

    let from_archivator = headers
        .get("x-client-name")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|name| name == ARCHIVATOR_CLIENT);
    if from_archivator {
        server.mark_log_archived().await;
    }

    Ok(([(header::CONTENT_TYPE, "text/plain")], body))
}

/// GET /agent_logs
async fn agent_logs(
    State(server): State<Arc<ControlServer>>,
) -> Result<impl IntoResponse, ApiError> {
    let contents = read_log(&server.config().paths.agent_log).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], contents))
}

async fn read_log(path: &Path) -> Result<String, ApiError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// Lines from `start_from` on, each terminated by `\n`.
fn lines_from(contents: &str, start_from: usize) -> String {
    contents
        .lines()
        .skip(start_from)
        .map(|line| format!("{}\n", line))
        .collect()
}
