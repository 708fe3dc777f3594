use crate::error::AgentError;
use crate::eventlogger::EventLogger;
use chrono::Utc;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shell session shared by the executors.
///
/// Every command runs in a fresh `bash` that first sources `state_file` and
/// afterwards rewrites it with the exported variables and the working
/// directory, so `export` and `cd` carry over to the next command. The state
/// file path is as seen by the shell, which for containers is a path inside
/// the container.
pub struct ShellSession {
    state_file: String,
    logger: Arc<EventLogger>,
    cancel: CancellationToken,
}

impl ShellSession {
    pub fn new(state_file: impl Into<String>, logger: Arc<EventLogger>) -> Self {
        Self {
            state_file: state_file.into(),
            logger,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state_file(&self) -> &str {
        &self.state_file
    }

    pub fn logger(&self) -> &Arc<EventLogger> {
        &self.logger
    }

    /// Kill the running command and make further commands fail.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Script that runs `directive` inside the session.
    pub fn script(&self, directive: &str) -> String {
        let state = shell_escape(&self.state_file);
        format!(
            "exec 2>&1\n\
             [ -f {state} ] && . {state}\n\
             {directive}\n\
             __agent_rc=$?\n\
             {{ export -p; printf 'cd %q\\n' \"$PWD\"; }} > {state}\n\
             exit $__agent_rc\n"
        )
    }

    /// State file lines exporting the given variables.
    pub fn export_lines(vars: &[(String, String)]) -> String {
        vars.iter()
            .map(|(name, value)| format!("export {}={}\n", name, shell_escape(value)))
            .collect()
    }

    /// Run a prepared command, streaming its output into the job log.
    /// Returns the exit code; spawn failures and cancellation count as 1.
    pub async fn run(&self, command: Command, directive: &str, silent: bool, alias: &str) -> i32 {
        if self.is_cancelled() {
            return 1;
        }

        let shown = if alias.is_empty() { directive } else { alias };
        let started_at = Utc::now().timestamp();
        if !silent {
            self.emit(self.logger.log_command_started(shown).await);
        }

        let exit_code = match self.execute(command, silent).await {
            Ok(code) => code,
            Err(e) => {
                warn!("Command '{}' could not run: {}", shown, e);
                if !silent {
                    self.emit(self.logger.log_command_output(&format!("{}\n", e)).await);
                }
                1
            }
        };

        if !silent {
            let finished_at = Utc::now().timestamp();
            self.emit(
                self.logger
                    .log_command_finished(shown, exit_code, started_at, finished_at)
                    .await,
            );
        }

        debug!("Command '{}' exited with {}", shown, exit_code);
        exit_code
    }

    async fn execute(&self, mut command: Command, silent: bool) -> Result<i32, AgentError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Process(format!("Failed to spawn: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Process("stderr not captured".into()))?;
        let mut out = BufReader::new(stdout).lines();
        let mut err = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        while !(out_done && err_done) {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => {
                    child.kill().await?;
                    return Ok(1);
                }
                line = out.next_line(), if !out_done => {
                    let line = line?;
                    out_done = line.is_none();
                    line
                }
                line = err.next_line(), if !err_done => {
                    let line = line?;
                    err_done = line.is_none();
                    line
                }
            };

            if let (Some(line), false) = (line, silent) {
                self.emit(self.logger.log_command_output(&format!("{}\n", line)).await);
            }
        }

        let status = tokio::select! {
            _ = self.cancel.cancelled() => {
                child.kill().await?;
                return Ok(1);
            }
            status = child.wait() => status?,
        };

        Ok(status.code().unwrap_or(1))
    }

    /// Log a step the executor performed itself (exporting variables,
    /// injecting files) the same way a command would appear.
    pub async fn log_step(&self, directive: &str, output: &[String], exit_code: i32, started_at: i64) {
        self.emit(self.logger.log_command_started(directive).await);
        for line in output {
            self.emit(self.logger.log_command_output(line).await);
        }
        let finished_at = Utc::now().timestamp();
        self.emit(
            self.logger
                .log_command_finished(directive, exit_code, started_at, finished_at)
                .await,
        );
    }

    fn emit(&self, result: Result<(), AgentError>) {
        if let Err(e) = result {
            warn!("Failed to write job log event: {}", e);
        }
    }
}

pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
