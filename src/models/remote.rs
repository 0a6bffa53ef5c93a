use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Start request sent to the remote executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteJob {
    #[serde(skip)]
    pub name: String,
    pub id: Uuid,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemotePhase {
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteResultState {
    Successful,
    Failed,
}

/// Status document returned by the remote executor for a job URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobStatus {
    pub phase: RemotePhase,
    #[serde(default)]
    pub log_lines: Vec<String>,
    #[serde(default)]
    pub result_state: Option<RemoteResultState>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteJobStatus {
    pub fn running(log_lines: Vec<String>) -> Self {
        Self {
            phase: RemotePhase::Running,
            log_lines,
            result_state: None,
            message: None,
        }
    }

    pub fn finished(
        result_state: RemoteResultState,
        log_lines: Vec<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            phase: RemotePhase::Finished,
            log_lines,
            result_state: Some(result_state),
            message,
        }
    }
}
