use agent_core::error::AgentError;
use agent_core::{EventLogger, Executor, ExecutorKind, JobRequest};
use std::path::Path;
use std::sync::Arc;

/// Create the executor a job request asks for.
pub fn create_executor(
    request: &JobRequest,
    work_root: &Path,
    logger: Arc<EventLogger>,
) -> Result<Arc<dyn Executor>, AgentError> {
    match request.executor {
        ExecutorKind::Shell => Ok(Arc::new(executor_local::LocalExecutor::new(
            &request.id,
            work_root,
            logger,
        ))),
        ExecutorKind::Container => {
            let spec = request.container.clone().ok_or_else(|| {
                AgentError::InvalidRequest("container executor requires container.image".into())
            })?;
            Ok(Arc::new(executor_container::ContainerExecutor::new(
                &request.id,
                spec,
                logger,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::eventlogger::FileBackend;

    fn logger() -> Arc<EventLogger> {
        Arc::new(EventLogger::new(Box::new(FileBackend::new(
            "/tmp/job-agent-dispatch-unused.json",
        ))))
    }

    #[test]
    fn dispatches_on_executor_kind() {
        let shell = JobRequest::from_json(br#"{"id": "a"}"#).unwrap();
        let executor = create_executor(&shell, Path::new("/tmp/work"), logger()).unwrap();
        assert_eq!(executor.name(), "shell");

        let container = JobRequest::from_json(
            br#"{"id": "b", "executor": "container", "container": {"image": "alpine"}}"#,
        )
        .unwrap();
        let executor = create_executor(&container, Path::new("/tmp/work"), logger()).unwrap();
        assert_eq!(executor.name(), "container");
    }
}
