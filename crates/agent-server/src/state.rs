use crate::error::ApiError;
use agent_core::{Job, JobId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Admission state of the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AgentState {
    #[default]
    WaitingForJob,
    ReceivedJob,
    JobStarted,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::WaitingForJob => write!(f, "waiting-for-job"),
            AgentState::ReceivedJob => write!(f, "received-job"),
            AgentState::JobStarted => write!(f, "job-started"),
        }
    }
}

#[derive(Default)]
struct Slot {
    state: AgentState,
    active: Option<Arc<Job>>,
}

/// Single-job registry. State and active job change together under one
/// lock, so two submissions can never both pass admission.
#[derive(Default)]
pub struct JobSlot {
    inner: Mutex<Slot>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> AgentState {
        self.inner.lock().await.state
    }

    pub async fn active(&self) -> Option<Arc<Job>> {
        self.inner.lock().await.active.clone()
    }

    /// Move `waiting-for-job` to `received-job`, or reject.
    pub async fn admit(&self) -> Result<(), ApiError> {
        let mut slot = self.inner.lock().await;
        if slot.state != AgentState::WaitingForJob {
            return Err(ApiError::JobAlreadyRunning);
        }
        slot.state = AgentState::ReceivedJob;
        Ok(())
    }

    /// Admitted request turned out malformed.
    pub async fn rollback(&self) {
        let mut slot = self.inner.lock().await;
        if slot.state == AgentState::ReceivedJob {
            slot.state = AgentState::WaitingForJob;
        }
    }

    pub async fn install(&self, job: Arc<Job>) {
        let mut slot = self.inner.lock().await;
        slot.active = Some(job);
        slot.state = AgentState::JobStarted;
    }

    /// Free the slot if `job_id` still holds it.
    pub async fn release(&self, job_id: &JobId) -> bool {
        let mut slot = self.inner.lock().await;
        match &slot.active {
            Some(job) if job.id() == job_id => {
                slot.active = None;
                slot.state = AgentState::WaitingForJob;
                debug!("Released job slot held by {}", job_id);
                true
            }
            _ => false,
        }
    }
}
