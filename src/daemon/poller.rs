use std::time::Duration;

use anyhow::{Context, Result};

use crate::clock::Clock;
use crate::daemon::registry::JobDescriptor;
use crate::models::{RemotePhase, RemoteResultState, ResultState, RunningState};
use crate::remote::RemoteJobExecutor;
use crate::storage::JobInfoRepository;
use uuid::Uuid;

/// Message stored when the remote side reports FINISHED without a result.
const MISSING_RESULT_MESSAGE: &str = "remote job finished without a result state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NotRunning,
    NotDue,
    MissingUri,
    StillRunning,
    Succeeded,
    Failed,
    SuccessHookFailed,
    /// Another host finished the record while this poll was in flight.
    FinishedElsewhere,
}

impl PollOutcome {
    /// True when this poll finished the RUNNING record.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollOutcome::Succeeded | PollOutcome::Failed | PollOutcome::SuccessHookFailed
        )
    }
}

/// Drives RUNNING remote jobs to a terminal state from the remote executor's
/// status reports.
pub struct RemotePoller<'a> {
    repository: &'a dyn JobInfoRepository,
    executor: &'a dyn RemoteJobExecutor,
    clock: &'a dyn Clock,
}

impl<'a> RemotePoller<'a> {
    pub fn new(
        repository: &'a dyn JobInfoRepository,
        executor: &'a dyn RemoteJobExecutor,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            repository,
            executor,
            clock,
        }
    }

    pub async fn poll(&self, descriptor: &JobDescriptor) -> Result<PollOutcome> {
        let name = descriptor.name.as_str();
        let Some(job) = self
            .repository
            .find_by_name_and_state(name, RunningState::Running)
            .await?
        else {
            return Ok(PollOutcome::NotRunning);
        };

        let interval = descriptor.polling_interval().unwrap_or(Duration::ZERO);
        let last_polled = job.created_at.max(job.last_modified_at);
        let since = (self.clock.now() - last_polled)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if since < interval {
            return Ok(PollOutcome::NotDue);
        }

        let Some(uri) = job.remote_job_uri() else {
            tracing::debug!("Remote job '{}' ({}) has no URI yet", name, job.id);
            return Ok(PollOutcome::MissingUri);
        };

        let status = self
            .executor
            .get_status(uri)
            .await
            .with_context(|| format!("Failed to fetch status of '{}' from {}", name, uri))?;
        if !self
            .repository
            .set_log_lines(name, status.log_lines.clone())
            .await?
        {
            return Ok(self.finished_elsewhere(name, job.id));
        }

        let message = status.message.as_deref();
        match (status.phase, status.result_state) {
            (RemotePhase::Running, _) => Ok(PollOutcome::StillRunning),
            (RemotePhase::Finished, Some(RemoteResultState::Successful)) => {
                match descriptor.runnable().execute_on_success().await {
                    Ok(()) => {
                        if !self
                            .repository
                            .mark_finished(name, ResultState::Successful, message)
                            .await?
                        {
                            return Ok(self.finished_elsewhere(name, job.id));
                        }
                        tracing::info!("Remote job '{}' ({}) finished successfully", name, job.id);
                        Ok(PollOutcome::Succeeded)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Success hook of remote job '{}' ({}) failed: {:#}",
                            name,
                            job.id,
                            e
                        );
                        if !self.repository.mark_finished_with_error(name, &e).await? {
                            return Ok(self.finished_elsewhere(name, job.id));
                        }
                        Ok(PollOutcome::SuccessHookFailed)
                    }
                }
            }
            (RemotePhase::Finished, result) => {
                let message = match result {
                    Some(_) => message,
                    None => Some(message.unwrap_or(MISSING_RESULT_MESSAGE)),
                };
                if !self
                    .repository
                    .mark_finished(name, ResultState::Failed, message)
                    .await?
                {
                    return Ok(self.finished_elsewhere(name, job.id));
                }
                tracing::warn!("Remote job '{}' ({}) failed", name, job.id);
                Ok(PollOutcome::Failed)
            }
        }
    }

    fn finished_elsewhere(&self, name: &str, id: Uuid) -> PollOutcome {
        tracing::debug!(
            "Remote job '{}' ({}) is no longer running here, another host finished it",
            name,
            id
        );
        PollOutcome::FinishedElsewhere
    }
}
