pub mod callback;
pub mod config;
pub mod error;
pub mod eventlogger;
pub mod executor;
pub mod job;
pub mod request;
pub mod session;

pub use callback::CallbackClient;
pub use config::AgentConfig;
pub use error::AgentError;
pub use eventlogger::{EventLogger, LogBackend, LogEvent};
pub use executor::Executor;
pub use job::{Job, JobOptions, JobPhase, JobResult};
pub use request::{Command, ExecutorKind, JobId, JobRequest};
