use crate::error::AgentError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The id as a single path component or container name: anything outside
    /// `[A-Za-z0-9._-]` becomes `-`, and an all-dot id is never `.` or `..`.
    pub fn safe_name(&self) -> String {
        let name: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect();

        if name.chars().all(|c| c == '.') {
            name.replace('.', "-")
        } else {
            name
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution environment a job asks for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Shell,
    Container,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Shell => write!(f, "shell"),
            ExecutorKind::Container => write!(f, "container"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    pub directive: String,
    #[serde(default)]
    pub alias: String,
}

impl Command {
    pub fn new(directive: impl Into<String>) -> Self {
        Self {
            directive: directive.into(),
            alias: String::new(),
        }
    }
}

/// Environment variable with a base64-encoded value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn decoded_value(&self) -> Result<String, AgentError> {
        let bytes = decode(&self.value, &self.name)?;
        String::from_utf8(bytes).map_err(|_| {
            AgentError::InvalidRequest(format!("env var {} is not valid UTF-8", self.name))
        })
    }
}

/// File to inject before the commands run. `content` is base64-encoded and
/// `mode` is an octal permission string such as "0644".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    pub path: String,
    pub content: String,
    #[serde(default = "default_file_mode")]
    pub mode: String,
}

fn default_file_mode() -> String {
    "0644".to_string()
}

impl File {
    pub fn decoded_content(&self) -> Result<Vec<u8>, AgentError> {
        decode(&self.content, &self.path)
    }

    pub fn mode_bits(&self) -> Result<u32, AgentError> {
        u32::from_str_radix(self.mode.trim(), 8).map_err(|_| {
            AgentError::InvalidRequest(format!("invalid mode '{}' for {}", self.mode, self.path))
        })
    }
}

fn decode(value: &str, what: &str) -> Result<Vec<u8>, AgentError> {
    STANDARD
        .decode(value)
        .map_err(|e| AgentError::InvalidRequest(format!("{} is not valid base64: {}", what, e)))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Callbacks {
    #[serde(default)]
    pub finished: String,
    #[serde(default)]
    pub teardown_finished: String,
}

/// How job log events leave the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoggerMethod {
    /// Batches are POSTed to a log collector.
    Push,
    /// Events go to the local job log file and an archiver pulls them.
    #[default]
    Pull,
}

impl fmt::Display for LoggerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggerMethod::Push => write!(f, "push"),
            LoggerMethod::Pull => write!(f, "pull"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggerConfig {
    #[serde(default)]
    pub method: LoggerMethod,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

fn default_max_buffer_size() -> usize {
    100
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            method: LoggerMethod::default(),
            url: None,
            token: None,
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerRuntime::Docker => write!(f, "docker"),
            ContainerRuntime::Podman => write!(f, "podman"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub runtime: ContainerRuntime,
}

/// A job as submitted to the agent. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub id: JobId,
    #[serde(default)]
    pub executor: ExecutorKind,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub epilogue_always_commands: Vec<Command>,
    #[serde(default)]
    pub epilogue_on_pass_commands: Vec<Command>,
    #[serde(default)]
    pub epilogue_on_fail_commands: Vec<Command>,
    #[serde(default)]
    pub callbacks: Callbacks,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
}

impl JobRequest {
    /// Parse and validate a job request body.
    pub fn from_json(body: &[u8]) -> Result<Self, AgentError> {
        let request: JobRequest = serde_json::from_slice(body)
            .map_err(|e| AgentError::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.id.0.is_empty() || self.id.safe_name() != self.id.0 {
            return Err(AgentError::InvalidRequest(format!(
                "job id {:?} may only contain letters, digits, '.', '_' and '-'",
                self.id.0
            )));
        }

        if self.logger.method == LoggerMethod::Push
            && self.logger.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(AgentError::InvalidRequest(
                "push logger requires a url".to_string(),
            ));
        }

        if self.executor == ExecutorKind::Container
            && self.container.as_ref().map_or(true, |c| c.image.is_empty())
        {
            return Err(AgentError::InvalidRequest(
                "container executor requires container.image".to_string(),
            ));
        }

        Ok(())
    }
}
