use thiserror::Error;

/// Errors surfaced by the scheduler to callers of its public operations.
///
/// Everything except `Internal` is an expected admission outcome.
#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("Job not registered: {0}")]
    NotRegistered(String),

    #[error("Job already queued: {0}")]
    AlreadyQueued(String),

    #[error("Job already running: {0}")]
    AlreadyRunning(String),

    #[error("Job execution not necessary: {0}")]
    ExecutionNotNecessary(String),

    #[error("Job execution is disabled: {0}")]
    ExecutionDisabled(String),

    #[error("Unknown job in running constraint: {0}")]
    UnknownJob(String),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl JobServiceError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            JobServiceError::NotRegistered(_) => "not_registered",
            JobServiceError::AlreadyQueued(_) => "already_queued",
            JobServiceError::AlreadyRunning(_) => "already_running",
            JobServiceError::ExecutionNotNecessary(_) => "execution_not_necessary",
            JobServiceError::ExecutionDisabled(_) => "execution_disabled",
            JobServiceError::UnknownJob(_) => "unknown_job",
            JobServiceError::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, JobServiceError>;

/// Errors from the remote executor wire contract.
#[derive(Debug, Error)]
pub enum RemoteJobError {
    /// The remote side already runs a job with the requested id.
    #[error("Remote job already running at {uri}")]
    AlreadyRunning { uri: String },

    #[error("Unexpected status {status} from remote executor: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Invalid response from remote executor: {0}")]
    InvalidResponse(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
