use super::event::LogEvent;
use super::LogBackend;
use crate::error::AgentError;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Pull backend: appends each event as a JSON line to the local job log,
/// which the control server serves to the archiver.
pub struct FileBackend {
    path: PathBuf,
    file: Option<File>,
    truncated: bool,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            truncated: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl LogBackend for FileBackend {
    async fn open(&mut self) -> Result<(), AgentError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Only the first open truncates; late writes after close append.
        let file = if self.truncated {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?
        } else {
            File::create(&self.path).await?
        };
        self.truncated = true;
        self.file = Some(file);
        Ok(())
    }

    async fn write(&mut self, event: LogEvent) -> Result<(), AgentError> {
        self.open().await?;
        let mut line = event.to_line()?;
        line.push('\n');

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AgentError::Logger("job log file is not open".to_string()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AgentError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_appended_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_log.json");

        let mut backend = FileBackend::new(&path);
        backend.open().await.unwrap();
        backend.open().await.unwrap();
        backend
            .write(LogEvent::JobStarted { timestamp: 1 })
            .await
            .unwrap();
        backend
            .write(LogEvent::JobFinished {
                timestamp: 2,
                result: "passed".to_string(),
            })
            .await
            .unwrap();
        backend.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("job_started"));
        assert!(lines[1].contains("\"result\":\"passed\""));
    }

    #[tokio::test]
    async fn write_after_close_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_log.json");
        std::fs::write(&path, "stale\n").unwrap();

        let mut backend = FileBackend::new(&path);
        backend
            .write(LogEvent::JobStarted { timestamp: 1 })
            .await
            .unwrap();
        backend.close().await.unwrap();
        backend
            .write(LogEvent::CmdOutput {
                timestamp: 2,
                output: "late\n".to_string(),
            })
            .await
            .unwrap();
        backend.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("job_started"));
        assert!(lines[1].contains("late"));
    }
}
