use crate::config::CallbackSettings;
use crate::error::AgentError;
use crate::job::JobResult;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivers the job's outbound callbacks to the control plane, retrying
/// transport errors and server-side failures a bounded number of times.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CallbackClient {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_settings(settings: &CallbackSettings) -> Self {
        Self::new(settings.max_attempts, settings.retry_delay())
    }

    /// POST `{"result": "<result>"}` to the finished callback.
    pub async fn send_finished(&self, url: &str, result: JobResult) -> Result<(), AgentError> {
        self.post(url, &serde_json::json!({ "result": result.as_str() }))
            .await
    }

    /// POST `{}` to the teardown-finished callback.
    pub async fn send_teardown_finished(&self, url: &str) -> Result<(), AgentError> {
        self.post(url, &serde_json::json!({})).await
    }

    pub async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), AgentError> {
        if url.is_empty() {
            debug!("No callback url for payload {}, skipping", payload);
            return Ok(());
        }

        debug!("Sending callback: {} with {}", url, payload);

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.client.post(url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Callback response: {}", response.status());
                    return Ok(());
                }
                Ok(response) if is_retryable(response.status()) => {
                    last_error = format!("got {} response", response.status());
                }
                Ok(response) => {
                    return Err(AgentError::Callback {
                        url: url.to_string(),
                        reason: format!("got {} response", response.status()),
                    });
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < self.max_attempts {
                warn!(attempt, "Callback to {} failed: {}, retrying", url, last_error);
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(AgentError::Callback {
            url: url.to_string(),
            reason: last_error,
        })
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
