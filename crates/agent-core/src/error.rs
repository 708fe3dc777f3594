use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Logger error: {0}")]
    Logger(String),

    #[error("Log collector rejected batch: got {0} response")]
    LogRejected(reqwest::StatusCode),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback to {url} failed: {reason}")]
    Callback { url: String, reason: String },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
