use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent configuration.
/// Loaded from ~/.config/job-agent/agent.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub teardown: TeardownSettings,
    #[serde(default)]
    pub callbacks: CallbackSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Job log written by pull-method jobs and served on /job_logs.
    #[serde(default = "default_job_log")]
    pub job_log: PathBuf,
    /// Agent process log served on /agent_logs.
    #[serde(default = "default_agent_log")]
    pub agent_log: PathBuf,
    /// Root for per-job working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            job_log: default_job_log(),
            agent_log: default_agent_log(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_job_log() -> PathBuf {
    PathBuf::from("/tmp/job_log.json")
}

fn default_agent_log() -> PathBuf {
    PathBuf::from("/tmp/agent_log")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp/job-agent")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownSettings {
    #[serde(default = "default_archive_poll_interval_ms")]
    pub archive_poll_interval_ms: u64,
}

impl Default for TeardownSettings {
    fn default() -> Self {
        Self {
            archive_poll_interval_ms: default_archive_poll_interval_ms(),
        }
    }
}

fn default_archive_poll_interval_ms() -> u64 {
    1000
}

impl TeardownSettings {
    pub fn archive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.archive_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    100
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl CallbackSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl AgentConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AgentConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("job-agent")
            .join("agent.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AgentConfig = serde_yaml::from_str(
            "server:\n  port: 9000\nteardown:\n  archive_poll_interval_ms: 50\n",
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.teardown.archive_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.callbacks.max_attempts, 100);
        assert_eq!(config.paths.job_log, PathBuf::from("/tmp/job_log.json"));
    }

    #[test]
    fn load_from_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "paths:\n  agent_log: /var/log/agent\n").unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.paths.agent_log, PathBuf::from("/var/log/agent"));
        assert!(AgentConfig::default_path().ends_with("job-agent/agent.yaml"));
    }
}
