use super::event::LogEvent;
use super::LogBackend;
use crate::error::AgentError;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Push backend: buffers events and POSTs them to a log collector in
/// batches of `buffer_size`.
///
/// `start_from` is the number of events the collector has acknowledged. It
/// is sent with every batch so the collector can resume or deduplicate, and
/// it only moves forward after a successful response.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    token: String,
    buffer: Vec<LogEvent>,
    buffer_size: usize,
    start_from: usize,
}

impl HttpBackend {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        buffer_size: usize,
    ) -> Result<Self, AgentError> {
        if buffer_size == 0 {
            return Err(AgentError::Logger(
                "buffer size needs to be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token: token.into(),
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            start_from: 0,
        })
    }

    /// Events acknowledged by the collector so far.
    pub fn start_from(&self) -> usize {
        self.start_from
    }

    /// Events waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn send(&self) -> Result<(), AgentError> {
        let lines = self
            .buffer
            .iter()
            .map(LogEvent::to_line)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Shipping {} log events from offset {}",
            lines.len(),
            self.start_from
        );

        let response = self
            .client
            .post(format!("{}?start_from={}", self.url, self.start_from))
            .header(CONTENT_TYPE, "text/plain")
            .bearer_auth(&self.token)
            .body(lines.join("\n"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentError::LogRejected(response.status()));
        }

        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AgentError> {
        self.send().await?;

        // Offset moves by the batch that was just acknowledged, before clearing.
        self.start_from += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogBackend for HttpBackend {
    async fn open(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn write(&mut self, event: LogEvent) -> Result<(), AgentError> {
        self.buffer.push(event);
        if self.buffer.len() < self.buffer_size {
            return Ok(());
        }

        self.flush().await
    }

    async fn close(&mut self) -> Result<(), AgentError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.flush().await
    }
}
