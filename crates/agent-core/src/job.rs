use crate::callback::CallbackClient;
use crate::error::AgentError;
use crate::eventlogger::EventLogger;
use crate::executor::Executor;
use crate::request::{Command, JobId, JobRequest, LoggerMethod};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Variable the result export command sets for the epilogues.
pub const JOB_RESULT_ENV: &str = "SEMAPHORE_JOB_RESULT";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Passed,
    Failed,
    Stopped,
}

impl JobResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResult::Passed => "passed",
            JobResult::Failed => "failed",
            JobResult::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase. Phases only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Created,
    Preparing,
    PrepareFailed,
    Running,
    Evaluated(JobResult),
    EpilogueAlways,
    EpilogueOnPass,
    EpilogueOnFail,
    Teardown,
    Finished,
}

impl JobPhase {
    fn rank(&self) -> u8 {
        match self {
            JobPhase::Created => 0,
            JobPhase::Preparing => 1,
            JobPhase::PrepareFailed | JobPhase::Running => 2,
            JobPhase::Evaluated(_) => 3,
            JobPhase::EpilogueAlways => 4,
            JobPhase::EpilogueOnPass | JobPhase::EpilogueOnFail => 5,
            JobPhase::Teardown => 6,
            JobPhase::Finished => 7,
        }
    }
}

/// Admits exactly one caller into teardown. Losers get `false` right away
/// instead of waiting.
#[derive(Debug, Default)]
pub struct TeardownGate(AtomicBool);

impl TeardownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Knobs the job takes from agent configuration.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub archive_poll_interval: Duration,
    pub callbacks: CallbackClient,
}

/// One job's lifecycle: prepare, commands, epilogues, teardown.
///
/// Teardown is entered from two places, the end of [`Job::run`] and
/// [`Job::stop`], which run on different tasks. The teardown gate makes sure
/// exactly one of them sends the callbacks and closes the logger.
pub struct Job {
    request: JobRequest,
    executor: Arc<dyn Executor>,
    logger: Arc<EventLogger>,
    callbacks: CallbackClient,
    archive_poll_interval: Duration,
    phase: watch::Sender<JobPhase>,
    finished: watch::Sender<bool>,
    stopped: AtomicBool,
    log_archived: AtomicBool,
    teardown_gate: TeardownGate,
}

impl Job {
    pub fn new(
        request: JobRequest,
        executor: Arc<dyn Executor>,
        logger: Arc<EventLogger>,
        options: JobOptions,
    ) -> Self {
        Self {
            request,
            executor,
            logger,
            callbacks: options.callbacks,
            archive_poll_interval: options.archive_poll_interval,
            phase: watch::Sender::new(JobPhase::Created),
            finished: watch::Sender::new(false),
            stopped: AtomicBool::new(false),
            log_archived: AtomicBool::new(false),
            teardown_gate: TeardownGate::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.request.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn phase(&self) -> JobPhase {
        *self.phase.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    pub fn is_log_archived(&self) -> bool {
        self.log_archived.load(Ordering::SeqCst)
    }

    /// Called when the archiver has pulled the job log; releases the
    /// teardown wait of pull-method jobs.
    pub fn mark_log_archived(&self) {
        self.log_archived.store(true, Ordering::SeqCst);
    }

    /// Wait until whichever path won teardown has finished it.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Run the whole lifecycle and return once teardown has completed.
    pub async fn run(&self) {
        info!(job_id = %self.id(), "Running job");
        let mut result = JobResult::Failed;

        if let Err(e) = self.logger.open().await {
            error!("Failed to open job logger: {}", e);
        }
        self.emit(self.logger.log_job_started().await);

        self.set_phase(JobPhase::Preparing);
        if self.prepare_environment().await == 0 {
            self.set_phase(JobPhase::Running);
            result = self.run_regular_commands().await;
            self.set_phase(JobPhase::Evaluated(result));

            match result {
                JobResult::Passed => info!("Regular commands finished successfully"),
                _ => info!("Regular commands finished with failure"),
            }

            debug!("Exporting job result");
            self.run_commands_until_first_failure(&[Command::new(format!(
                "export {}={}",
                JOB_RESULT_ENV, result
            ))])
            .await;

            self.run_epilogues(result).await;
        } else {
            error!("Executor failed to boot up");
            self.set_phase(JobPhase::PrepareFailed);
        }

        // A stop interrupted the commands, so its own teardown reports
        // `stopped`; this path only waits for it.
        if self.is_stopped() {
            debug!("Job was stopped, teardown belongs to the stop path");
        } else {
            self.teardown(result).await;
        }
        self.wait_finished().await;
    }

    pub async fn prepare_environment(&self) -> i32 {
        let exit_code = self.executor.prepare().await;
        if exit_code != 0 {
            error!(exit_code, "Failed to prepare executor");
            return exit_code;
        }

        // Teardown may already have cleaned up; starting now would leak.
        if self.is_stopped() {
            info!("Job stopped while preparing, not starting executor");
            return 1;
        }

        let exit_code = self.executor.start().await;
        if exit_code != 0 {
            error!(exit_code, "Failed to start executor");
            return exit_code;
        }

        // Stopped while booting: the stop path may have cleaned up before
        // the environment existed.
        if self.is_stopped() {
            info!("Job stopped while starting, cleaning up executor");
            if let Err(e) = self.executor.cleanup().await {
                warn!("Executor cleanup failed: {}", e);
            }
            return 1;
        }

        0
    }

    pub async fn run_regular_commands(&self) -> JobResult {
        if self.is_stopped() {
            return JobResult::Stopped;
        }
        let exit_code = self.executor.export_env_vars(&self.request.env_vars).await;
        if exit_code != 0 {
            error!(exit_code, "Failed to export env vars");
            return JobResult::Failed;
        }

        if self.is_stopped() {
            return JobResult::Stopped;
        }
        let exit_code = self.executor.inject_files(&self.request.files).await;
        if exit_code != 0 {
            error!(exit_code, "Failed to inject files");
            return JobResult::Failed;
        }

        match self
            .run_commands_until_first_failure(&self.request.commands)
            .await
        {
            0 => JobResult::Passed,
            _ => JobResult::Failed,
        }
    }

    /// Run commands in order until one fails. Returns the last exit code, or
    /// 1 when nothing ran at all (empty list, or stopped before the first).
    pub async fn run_commands_until_first_failure(&self, commands: &[Command]) -> i32 {
        let mut last_exit_code = 1;

        for command in commands {
            if self.is_stopped() {
                return 1;
            }

            last_exit_code = self
                .executor
                .run_command(&command.directive, false, &command.alias)
                .await;

            if last_exit_code != 0 {
                break;
            }
        }

        last_exit_code
    }

    async fn run_epilogues(&self, result: JobResult) {
        info!("Starting epilogue always commands");
        self.set_phase(JobPhase::EpilogueAlways);
        self.run_commands_until_first_failure(&self.request.epilogue_always_commands)
            .await;

        if result == JobResult::Passed {
            info!("Starting epilogue on pass commands");
            self.set_phase(JobPhase::EpilogueOnPass);
            self.run_commands_until_first_failure(&self.request.epilogue_on_pass_commands)
                .await;
        } else {
            info!("Starting epilogue on fail commands");
            self.set_phase(JobPhase::EpilogueOnFail);
            self.run_commands_until_first_failure(&self.request.epilogue_on_fail_commands)
                .await;
        }
    }

    /// Report the result, ship the log and mark the job finished. Only the
    /// first caller gets past the gate.
    pub async fn teardown(&self, result: JobResult) {
        if !self.teardown_gate.try_acquire() {
            warn!("Duplicate attempts to enter the teardown phase");
            return;
        }
        self.set_phase(JobPhase::Teardown);

        debug!("Sending finished callback");
        if let Err(e) = self
            .callbacks
            .send_finished(&self.request.callbacks.finished, result)
            .await
        {
            error!("Finished callback failed: {}", e);
        }
        self.emit(self.logger.log_job_finished(result.as_str()).await);

        if self.request.logger.method == LoggerMethod::Pull {
            debug!("Waiting for archivator");
            while !self.is_log_archived() {
                tokio::time::sleep(self.archive_poll_interval).await;
            }
            debug!("Archivator finished");
        }

        if let Err(e) = self.logger.close().await {
            error!("Error closing logger: {}", e);
        }

        if let Err(e) = self.executor.cleanup().await {
            warn!("Executor cleanup failed: {}", e);
        }

        if let Err(e) = self
            .callbacks
            .send_teardown_finished(&self.request.callbacks.teardown_finished)
            .await
        {
            error!("Teardown finished callback failed: {}", e);
        }

        self.set_phase(JobPhase::Finished);
        self.finished.send_replace(true);
        info!(job_id = %self.id(), %result, "Job teardown finished");
    }

    /// Stop the job from outside the lifecycle task. The command loop will not
    /// start another command, the executor is asked to stop, and teardown runs
    /// with result `stopped` unless the lifecycle already got there.
    pub async fn stop(&self) {
        info!(job_id = %self.id(), "Stopping job");
        self.stopped.store(true, Ordering::SeqCst);

        debug!("Invoking process stopping");
        let executor = Arc::clone(&self.executor);
        match tokio::spawn(async move { executor.stop().await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Executor failed to stop: {}", e),
            Err(e) => warn!("Executor stop aborted: {}", e),
        }

        self.teardown(JobResult::Stopped).await;
    }

    fn set_phase(&self, next: JobPhase) {
        self.phase.send_if_modified(|phase| {
            if next.rank() > phase.rank() {
                *phase = next;
                true
            } else {
                false
            }
        });
    }

    fn emit(&self, result: Result<(), AgentError>) {
        if let Err(e) = result {
            warn!("Failed to write job log event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_admits_one_caller() {
        let gate = TeardownGate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[test]
    fn phases_are_ordered() {
        assert!(JobPhase::Running.rank() > JobPhase::Preparing.rank());
        assert!(JobPhase::Teardown.rank() > JobPhase::EpilogueOnFail.rank());
        assert_eq!(
            JobPhase::PrepareFailed.rank(),
            JobPhase::Running.rank()
        );
    }

    #[test]
    fn result_strings() {
        assert_eq!(JobResult::Passed.to_string(), "passed");
        assert_eq!(
            serde_json::to_string(&JobResult::Stopped).unwrap(),
            "\"stopped\""
        );
    }
}
