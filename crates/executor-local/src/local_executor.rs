use agent_core::error::AgentError;
use agent_core::eventlogger::EventLogger;
use agent_core::request::{EnvVar, File, JobId};
use agent_core::session::ShellSession;
use agent_core::Executor;
use chrono::Utc;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

const STATE_FILE: &str = ".job-agent-state";

/// Local executor: runs job commands with bash directly on the host, inside
/// a per-job working directory.
pub struct LocalExecutor {
    work_dir: PathBuf,
    session: ShellSession,
}

impl LocalExecutor {
    pub fn new(job_id: &JobId, work_root: &Path, logger: Arc<EventLogger>) -> Self {
        let work_dir = work_root.join(job_id.safe_name());
        let state_file = work_dir.join(STATE_FILE).display().to_string();
        Self {
            work_dir,
            session: ShellSession::new(state_file, logger),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn command(&self, directive: &str) -> Command {
        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(self.session.script(directive))
            .current_dir(&self.work_dir);
        command
    }

    /// `~` is the home directory; relative paths live in the work dir.
    fn resolve(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    async fn write_file(&self, file: &File) -> Result<PathBuf, AgentError> {
        let content = file.decoded_content()?;
        let mode = file.mode_bits()?;
        let path = self.resolve(&file.path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn prepare(&self) -> i32 {
        if let Err(e) = tokio::fs::create_dir_all(&self.work_dir).await {
            error!("Failed to create work dir {}: {}", self.work_dir.display(), e);
            return 1;
        }

        let state = Path::new(self.session.state_file());
        if state.exists() {
            if let Err(e) = tokio::fs::remove_file(state).await {
                error!("Failed to reset shell state: {}", e);
                return 1;
            }
        }

        info!("Prepared work dir {}", self.work_dir.display());
        0
    }

    async fn start(&self) -> i32 {
        let exit_code = self.session.run(self.command("true"), "true", true, "").await;
        if exit_code != 0 {
            error!("bash is not usable on this host");
        }
        exit_code
    }

    async fn stop(&self) -> Result<(), AgentError> {
        warn!("Stopping local executor in {}", self.work_dir.display());
        self.session.cancel();
        Ok(())
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

        let lines = ShellSession::export_lines(&vars);
        let exit_code = match append(self.session.state_file(), &lines).await {
            Ok(()) => 0,
            Err(e) => {
                output.push(format!("Failed to write shell state: {}\n", e));
                1
            }
        };

        debug!("Exported {} env vars", vars.len());
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
                Ok(path) => output.push(format!(
                    "Injecting {} with file mode {}\n",
                    path.display(),
                    file.mode
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
            .run(self.command(directive), directive, silent, alias)
            .await
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        if self.work_dir.exists() {
            info!("Cleaning up work dir: {}", self.work_dir.display());
            tokio::fs::remove_dir_all(&self.work_dir).await?;
        }
        Ok(())
    }
}

async fn append(path: &str, contents: &str) -> Result<(), AgentError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
