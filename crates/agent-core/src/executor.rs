use crate::error::AgentError;
use crate::request::{EnvVar, File};

/// Capability every execution environment implements.
///
/// Operations that run something report the exit code: 0 is success,
/// anything else is a failure the job folds into its result. Only `stop`
/// reports errors, so the caller can log them and keep tearing down.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Executor kind string ("shell", "container").
    fn name(&self) -> &str;

    /// Prepare the environment (working directory, image pull, ...).
    async fn prepare(&self) -> i32;

    /// Boot the environment so commands can run.
    async fn start(&self) -> i32;

    /// Interrupt the running command and refuse further ones.
    async fn stop(&self) -> Result<(), AgentError>;

    /// Export variables for every subsequent command.
    async fn export_env_vars(&self, env_vars: &[EnvVar]) -> i32;

    /// Write files into the environment.
    async fn inject_files(&self, files: &[File]) -> i32;

    /// Run one command. `silent` suppresses its log events.
    async fn run_command(&self, directive: &str, silent: bool, alias: &str) -> i32;

    /// Release what `prepare`/`start` created. Runs once, during teardown.
    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}
