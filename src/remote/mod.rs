pub mod http;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::daemon::logger::JobLogger;
use crate::daemon::registry::JobRunnable;
use crate::errors::RemoteJobError;
use crate::models::job::{REMOTE_JOB_URI, RESUMED_ALREADY_RUNNING_JOB};
use crate::models::{RemoteJob, RemoteJobStatus};

pub use http::HttpRemoteJobExecutor;

/// Client side of the remote executor contract.
#[async_trait]
pub trait RemoteJobExecutor: Send + Sync {
    /// Start `job` remotely and return the URI to poll. If the remote side
    /// already runs a job with this id, fails with
    /// [`RemoteJobError::AlreadyRunning`] carrying the existing URI.
    async fn start_job(&self, job: &RemoteJob) -> Result<String, RemoteJobError>;

    async fn get_status(&self, uri: &str) -> Result<RemoteJobStatus, RemoteJobError>;
}

pub type SuccessHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Stock runnable for remote jobs: starts the job on the remote executor and
/// records the URI in the RUNNING record for the poller.
pub struct RemoteJobRunnable {
    name: String,
    parameters: BTreeMap<String, String>,
    executor: Arc<dyn RemoteJobExecutor>,
    on_success: Option<SuccessHook>,
}

impl RemoteJobRunnable {
    pub fn new(
        name: impl Into<String>,
        parameters: BTreeMap<String, String>,
        executor: Arc<dyn RemoteJobExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            executor,
            on_success: None,
        }
    }

    pub fn on_success(mut self, hook: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

#[async_trait]
impl JobRunnable for RemoteJobRunnable {
    async fn execute(&self, logger: &JobLogger) -> anyhow::Result<()> {
        let job = RemoteJob {
            name: self.name.clone(),
            id: logger.id(),
            parameters: self.parameters.clone(),
        };

        match self.executor.start_job(&job).await {
            Ok(uri) => {
                tracing::info!("Started remote job '{}' at {}", self.name, uri);
                logger.insert_or_update_additional_data(REMOTE_JOB_URI, &uri).await?;
                Ok(())
            }
            Err(RemoteJobError::AlreadyRunning { uri }) => {
                tracing::info!(
                    "Remote job '{}' already running at {}, resuming",
                    self.name,
                    uri
                );
                logger.insert_or_update_additional_data(REMOTE_JOB_URI, &uri).await?;
                logger
                    .insert_or_update_additional_data(RESUMED_ALREADY_RUNNING_JOB, &uri)
                    .await?;
                logger
                    .add_log_line(format!("Resumed already running remote job at {}", uri))
                    .await?;
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to start remote job '{}'", self.name))),
        }
    }

    async fn execute_on_success(&self) -> anyhow::Result<()> {
        match &self.on_success {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}
