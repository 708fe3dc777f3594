mod event;
mod file;
mod http;

pub use event::LogEvent;
pub use file::FileBackend;
pub use http::HttpBackend;

use crate::error::AgentError;
use crate::request::{LoggerConfig, LoggerMethod};
use chrono::Utc;
use std::path::Path;
use tokio::sync::Mutex;

/// Physical delivery of job log events.
#[async_trait::async_trait]
pub trait LogBackend: Send {
    async fn open(&mut self) -> Result<(), AgentError>;

    async fn write(&mut self, event: LogEvent) -> Result<(), AgentError>;

    async fn close(&mut self) -> Result<(), AgentError>;
}

/// Append-only sink for job and command events, shared by the job and its
/// executor. Writes are serialized so events reach the backend in order.
pub struct EventLogger {
    backend: Mutex<Box<dyn LogBackend>>,
}

impl EventLogger {
    pub fn new(backend: Box<dyn LogBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Build the backend the job request asks for. Pull jobs write to
    /// `job_log_path`.
    pub fn from_config(config: &LoggerConfig, job_log_path: &Path) -> Result<Self, AgentError> {
        let backend: Box<dyn LogBackend> = match config.method {
            LoggerMethod::Push => {
                let url = config
                    .url
                    .as_deref()
                    .ok_or_else(|| AgentError::Logger("push logger requires a url".into()))?;
                let token = config.token.as_deref().unwrap_or_default();
                Box::new(HttpBackend::new(url, token, config.max_buffer_size)?)
            }
            LoggerMethod::Pull => Box::new(FileBackend::new(job_log_path)),
        };

        Ok(Self::new(backend))
    }

    pub async fn open(&self) -> Result<(), AgentError> {
        self.backend.lock().await.open().await
    }

    pub async fn write(&self, event: LogEvent) -> Result<(), AgentError> {
        self.backend.lock().await.write(event).await
    }

    pub async fn close(&self) -> Result<(), AgentError> {
        self.backend.lock().await.close().await
    }

    pub async fn log_job_started(&self) -> Result<(), AgentError> {
        self.write(LogEvent::JobStarted {
            timestamp: Utc::now().timestamp(),
        })
        .await
    }

    pub async fn log_command_started(&self, directive: &str) -> Result<(), AgentError> {
        self.write(LogEvent::CmdStarted {
            timestamp: Utc::now().timestamp(),
            directive: directive.to_string(),
        })
        .await
    }

    pub async fn log_command_output(&self, output: &str) -> Result<(), AgentError> {
        self.write(LogEvent::CmdOutput {
            timestamp: Utc::now().timestamp(),
            output: output.to_string(),
        })
        .await
    }

    pub async fn log_command_finished(
        &self,
        directive: &str,
        exit_code: i32,
        started_at: i64,
        finished_at: i64,
    ) -> Result<(), AgentError> {
        self.write(LogEvent::CmdFinished {
            timestamp: Utc::now().timestamp(),
            directive: directive.to_string(),
            exit_code,
            started_at,
            finished_at,
        })
        .await
    }

    pub async fn log_job_finished(&self, result: &str) -> Result<(), AgentError> {
        self.write(LogEvent::JobFinished {
            timestamp: Utc::now().timestamp(),
            result: result.to_string(),
        })
        .await
    }
}
