use agent_core::error::AgentError;
use agent_core::eventlogger::EventLogger;
use agent_core::request::{ContainerRuntime, ContainerSpec, EnvVar, File, JobId};
use agent_core::session::{shell_escape, ShellSession};
use agent_core::Executor;
use chrono::Utc;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Shell state lives inside the container.
const STATE_FILE: &str = "/tmp/.job-agent-state";
const WORK_DIR: &str = "/workspace";

/// Container executor: boots one long-running Docker/Podman container per
/// job and runs every command in it with `exec`.
pub struct ContainerExecutor {
    job_id: JobId,
    spec: ContainerSpec,
    session: ShellSession,
}

impl ContainerExecutor {
    pub fn new(job_id: &JobId, spec: ContainerSpec, logger: Arc<EventLogger>) -> Self {
        Self {
            job_id: job_id.clone(),
            spec,
            session: ShellSession::new(STATE_FILE, logger),
        }
    }

    /// Get the container runtime command ("docker" or "podman").
    fn runtime_cmd(&self) -> &str {
        match self.spec.runtime {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    /// Container name for this job, restricted to characters runtimes accept.
    pub fn container_name(&self) -> String {
        format!("job-agent-{}", self.job_id.safe_name())
    }

    /// Run a container runtime command and return stdout.
    async fn run_cmd(&self, args: &[&str]) -> Result<String, AgentError> {
        let runtime = self.runtime_cmd();
        debug!("Running: {} {}", runtime, args.join(" "));

        let output = Command::new(runtime)
            .args(args)
            .output()
            .await
            .map_err(|e| AgentError::ContainerRuntime(format!("Failed to run {}: {}", runtime, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::ContainerRuntime(format!(
                "{} {} failed: {}",
                runtime,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn exec_command(&self, directive: &str) -> Command {
        let mut command = Command::new(self.runtime_cmd());
        command
            .arg("exec")
            .arg(self.container_name())
            .arg("bash")
            .arg("-c")
            .arg(self.session.script(directive));
        command
    }

    /// Pipe `content` into a shell snippet running in the container.
    async fn pipe_into(&self, script: &str, content: &[u8]) -> Result<(), AgentError> {
        let mut child = Command::new(self.runtime_cmd())
            .args(["exec", "-i", &self.container_name(), "sh", "-c", script])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::ContainerRuntime(format!("Failed to spawn exec: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(AgentError::ContainerRuntime(format!(
                "exec failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn write_file(&self, file: &File) -> Result<(), AgentError> {
        let content = file.decoded_content()?;
        let mode = file.mode_bits()?;
        let target = container_path(&file.path);
        let script = format!(
            "mkdir -p \"$(dirname {target})\" && cat > {target} && chmod {mode:o} {target}"
        );
        self.pipe_into(&script, &content).await
    }

    /// Report a runtime step to the job log and turn it into an exit code.
    async fn step(&self, title: &str, result: Result<String, AgentError>, started_at: i64) -> i32 {
        let (output, exit_code) = match result {
            Ok(stdout) => (lines(&stdout), 0),
            Err(e) => {
                error!("{}: {}", title, e);
                (vec![format!("{}\n", e)], 1)
            }
        };
        self.session
            .log_step(title, &output, exit_code, started_at)
            .await;
        exit_code
    }
}

#[async_trait::async_trait]
impl Executor for ContainerExecutor {
    fn name(&self) -> &str {
        "container"
    }

    async fn prepare(&self) -> i32 {
        let started_at = Utc::now().timestamp();
        let title = format!("Pulling {}", self.spec.image);
        let result = self.run_cmd(&["pull", &self.spec.image]).await;
        self.step(&title, result, started_at).await
    }

    async fn start(&self) -> i32 {
        if self.session.is_cancelled() {
            warn!("Job {} was stopped, not starting a container", self.job_id);
            return 1;
        }

        let started_at = Utc::now().timestamp();
        let name = self.container_name();
        let result = self
            .run_cmd(&[
                "run",
                "-d",
                "--name",
                &name,
                "-w",
                WORK_DIR,
                &self.spec.image,
                "sleep",
                "infinity",
            ])
            .await;

        if let Ok(id) = &result {
            info!(
                "Job {} running in container {} ({})",
                self.job_id,
                name,
                id.get(..12).unwrap_or(id)
            );
        }
        self.step("Starting container", result, started_at).await
    }

    async fn stop(&self) -> Result<(), AgentError> {
        let name = self.container_name();
        warn!("Stopping container {} for job {}", name, self.job_id);
        self.session.cancel();
        self.run_cmd(&["rm", "-f", &name]).await.map(|_| ())
    }

    async fn export_env_vars(&self, env_vars: &[EnvVar]) -> i32 {
        if env_vars.is_empty() {
            return 0;
        }

        let started_at = Utc::now().timestamp();
        let mut output = Vec::new();
        let mut vars = Vec::new();
        for var in env_vars {
            match var.decoded_value() {
                Ok(value) => {
                    output.push(format!("Exporting {}\n", var.name));
                    vars.push((var.name.clone(), value));
                }
                Err(e) => {
                    output.push(format!("{}\n", e));
                    self.session
                        .log_step("Exporting environment variables", &output, 1, started_at)
                        .await;
                    return 1;
                }
            }
        }

        let script = format!("cat >> {}", shell_escape(STATE_FILE));
        let lines = ShellSession::export_lines(&vars);
        let exit_code = match self.pipe_into(&script, lines.as_bytes()).await {
            Ok(()) => 0,
            Err(e) => {
                output.push(format!("{}\n", e));
                1
            }
        };

        self.session
            .log_step("Exporting environment variables", &output, exit_code, started_at)
            .await;
        exit_code
    }

    async fn inject_files(&self, files: &[File]) -> i32 {
        if files.is_empty() {
            return 0;
        }

        let started_at = Utc::now().timestamp();
        let mut output = Vec::new();
        let mut exit_code = 0;
        for file in files {
            match self.write_file(file).await {
                Ok(()) => output.push(format!(
                    "Injecting {} with file mode {}\n",
                    file.path, file.mode
                )),
                Err(e) => {
                    output.push(format!("Failed to inject {}: {}\n", file.path, e));
                    exit_code = 1;
                    break;
                }
            }
        }

        self.session
            .log_step("Injecting Files", &output, exit_code, started_at)
            .await;
        exit_code
    }

    async fn run_command(&self, directive: &str, silent: bool, alias: &str) -> i32 {
        self.session
            .run(self.exec_command(directive), directive, silent, alias)
            .await
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        let name = self.container_name();
        info!("Removing container {} for job {}", name, self.job_id);
        // Already gone when the job was stopped.
        let _ = self.run_cmd(&["rm", "-f", &name]).await;
        Ok(())
    }
}

/// Shell word for a path inside the container; `~/` expands to `$HOME`.
fn container_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME\"/{}", shell_escape(rest)),
        None => shell_escape(path),
    }
}

fn lines(stdout: &str) -> Vec<String> {
    stdout.lines().map(|l| format!("{}\n", l)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::eventlogger::FileBackend;

    fn executor(id: &str, runtime: ContainerRuntime) -> ContainerExecutor {
        let logger = Arc::new(EventLogger::new(Box::new(FileBackend::new(
            "/tmp/job-agent-test-unused.json",
        ))));
        ContainerExecutor::new(
            &JobId::from_string(id.to_string()),
            ContainerSpec {
                image: "ubuntu:22.04".to_string(),
                runtime,
            },
            logger,
        )
    }

    #[test]
    fn container_name_is_sanitized() {
        let executor = executor("job/1:a b", ContainerRuntime::Docker);
        assert_eq!(executor.container_name(), "job-agent-job-1-a-b");
    }

    #[test]
    fn runtime_follows_container_settings() {
        assert_eq!(executor("a", ContainerRuntime::Docker).runtime_cmd(), "docker");
        assert_eq!(executor("a", ContainerRuntime::Podman).runtime_cmd(), "podman");
        assert_eq!(executor("a", ContainerRuntime::Podman).name(), "container");
    }

    #[test]
    fn exec_command_runs_session_script() {
        let executor = executor("job-7", ContainerRuntime::Podman);
        let command = executor.exec_command("make test");
        let inner = command.as_std();

        assert_eq!(inner.get_program(), "podman");
        let args: Vec<_> = inner.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(&args[..4], &["exec", "job-agent-job-7", "bash", "-c"]);
        assert!(args[4].contains("make test"));
        assert!(args[4].contains(STATE_FILE));
    }

    #[test]
    fn container_paths_are_quoted() {
        assert_eq!(container_path("/etc/app.conf"), "'/etc/app.conf'");
        assert_eq!(container_path("~/.ssh/id"), "\"$HOME\"/'.ssh/id'");
    }
}
