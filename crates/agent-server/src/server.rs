use crate::dispatch::create_executor;
use crate::error::ApiError;
use crate::state::{AgentState, JobSlot};
use crate::VERSION;
use agent_core::error::AgentError;
use agent_core::{AgentConfig, CallbackClient, EventLogger, Job, JobId, JobOptions, JobRequest};
use std::sync::Arc;
use tracing::{error, info, warn};

/// HTTP-facing admission gate and supervisor: runs at most one job at a time,
/// relays stop requests and serves the job and agent logs.
pub struct ControlServer {
    config: AgentConfig,
    slot: JobSlot,
}

impl ControlServer {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            slot: JobSlot::new(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn slot(&self) -> &JobSlot {
        &self.slot
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub async fn state(&self) -> AgentState {
        self.slot.state().await
    }

    /// Admit, build and start a job. The lifecycle runs on its own task and
    /// frees the slot once the job is finished.
    pub async fn submit(self: &Arc<Self>, body: &[u8]) -> Result<JobId, ApiError> {
        self.slot.admit().await?;

        let job = match self.build_job(body) {
            Ok(job) => Arc::new(job),
            Err(e) => {
                warn!("Rejected job request: {}", e);
                self.slot.rollback().await;
                return Err(e.into());
            }
        };

        let job_id = job.id().clone();
        info!(job_id = %job_id, executor = %job.request().executor, "Accepted job");
        self.slot.install(Arc::clone(&job)).await;

        let server = Arc::clone(self);
        tokio::spawn(async move {
            job.run().await;
            if server.slot.release(job.id()).await {
                info!(job_id = %job.id(), "Agent is waiting for the next job");
            }
        });

        Ok(job_id)
    }

    fn build_job(&self, body: &[u8]) -> Result<Job, AgentError> {
        let request = JobRequest::from_json(body)?;
        let logger = Arc::new(EventLogger::from_config(
            &request.logger,
            &self.config.paths.job_log,
        )?);
        let executor = create_executor(&request, &self.config.paths.work_dir, Arc::clone(&logger))?;

        Ok(Job::new(request, executor, logger, self.job_options()))
    }

    fn job_options(&self) -> JobOptions {
        JobOptions {
            archive_poll_interval: self.config.teardown.archive_poll_interval(),
            callbacks: CallbackClient::from_settings(&self.config.callbacks),
        }
    }

    /// Ask the active job to stop without waiting for its teardown.
    pub async fn stop(&self) {
        match self.slot.active().await {
            Some(job) => {
                info!(job_id = %job.id(), "Stop requested");
                tokio::spawn(async move { job.stop().await });
            }
            None => info!("Stop requested but no job is running"),
        }
    }

    /// The archiver pulled the job log; the active job may finish teardown.
    pub async fn mark_log_archived(&self) {
        if let Some(job) = self.slot.active().await {
            info!(job_id = %job.id(), "Job log archived");
            job.mark_log_archived();
        }
    }

    pub async fn serve(self: Arc<Self>) -> Result<(), AgentError> {
        let address = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
            error!("Failed to bind {}: {}", address, e);
            e
        })?;

        info!("Agent {} listening on http://{}", VERSION, address);
        axum::serve(listener, crate::http::router(self)).await?;
        Ok(())
    }
}
