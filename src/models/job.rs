use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Additional-data key holding the URI of the remote side of a remote job.
pub const REMOTE_JOB_URI: &str = "remoteJobUri";

/// Additional-data key set when a remote start adopted an already running job.
pub const RESUMED_ALREADY_RUNNING_JOB: &str = "resumedAlreadyRunningJob";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunningState {
    Queued,
    Running,
    Finished,
}

impl RunningState {
    /// Only queued and running records occupy a `(name, state)` slot.
    pub fn is_active(self) -> bool {
        matches!(self, RunningState::Queued | RunningState::Running)
    }
}

impl fmt::Display for RunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunningState::Queued => "QUEUED",
            RunningState::Running => "RUNNING",
            RunningState::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultState {
    Successful,
    Failed,
    TimedOut,
    NotExecuted,
    Error,
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultState::Successful => "SUCCESSFUL",
            ResultState::Failed => "FAILED",
            ResultState::TimedOut => "TIMED_OUT",
            ResultState::NotExecuted => "NOT_EXECUTED",
            ResultState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One job instance as persisted in the job store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
    pub state: RunningState,
    #[serde(default)]
    pub result_state: Option<ResultState>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub thread: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub max_execution_time_ms: u64,
    #[serde(default)]
    pub force_execution: bool,
    #[serde(default)]
    pub additional_data: BTreeMap<String, String>,
    #[serde(default)]
    pub log_lines: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobInfo {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    /// A running record is timed out once `now` passes
    /// `last_modified_at + max_execution_time`.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.state != RunningState::Running {
            return false;
        }
        let max = chrono::Duration::milliseconds(
            i64::try_from(self.max_execution_time_ms).unwrap_or(i64::MAX),
        );
        match self.last_modified_at.checked_add_signed(max) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    pub fn remote_job_uri(&self) -> Option<&str> {
        self.additional_data.get(REMOTE_JOB_URI).map(String::as_str)
    }
}

/// Parameters for creating a record through the slot-claim primitive.
#[derive(Debug, Clone)]
pub struct NewJobInfo {
    pub name: String,
    pub state: RunningState,
    pub max_execution_time: Duration,
    pub force_execution: bool,
    pub additional_data: BTreeMap<String, String>,
    /// Executor identity; only meaningful for records created as RUNNING.
    pub host: Option<String>,
    pub thread: Option<String>,
}

impl NewJobInfo {
    pub fn new(name: impl Into<String>, state: RunningState, max_execution_time: Duration) -> Self {
        Self {
            name: name.into(),
            state,
            max_execution_time,
            force_execution: false,
            additional_data: BTreeMap::new(),
            host: None,
            thread: None,
        }
    }

    pub fn force_execution(mut self, force: bool) -> Self {
        self.force_execution = force;
        self
    }

    pub fn executed_by(mut self, host: impl Into<String>, thread: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self.thread = Some(thread.into());
        self
    }

    pub fn with_additional_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }
}
