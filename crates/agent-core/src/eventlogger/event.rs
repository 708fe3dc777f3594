use serde::{Deserialize, Serialize};

/// Structured job log event. Serialized as one compact JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    JobStarted {
        timestamp: i64,
    },
    CmdStarted {
        timestamp: i64,
        directive: String,
    },
    CmdOutput {
        timestamp: i64,
        output: String,
    },
    CmdFinished {
        timestamp: i64,
        directive: String,
        exit_code: i32,
        started_at: i64,
        finished_at: i64,
    },
    JobFinished {
        timestamp: i64,
        result: String,
    },
}

impl LogEvent {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
