use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::daemon::constraints::ConstraintSet;
use crate::daemon::executor::DispatchPool;
use crate::daemon::host::{host_name, thread_label};
use crate::daemon::logger::JobLogger;
use crate::daemon::poller::RemotePoller;
use crate::daemon::registry::{JobDescriptor, JobKind, RunnableRegistry};
use crate::errors::{JobServiceError, Result};
use crate::models::{NewJobInfo, ResultState, RunningState, ServiceConfig};
use crate::remote::RemoteJobExecutor;
use crate::storage::JobInfoRepository;

/// Error message stored on records failed by [`JobService::shutdown`].
pub const SHUTDOWN_MESSAGE: &str = "shutdown called from executing host";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

pub struct JobServiceOptions {
    /// This process's executor identity.
    pub host: String,
    pub clock: Arc<dyn Clock>,
    pub worker_pool_size: usize,
    pub dispatch_queue_capacity: usize,
    pub execution_enabled: bool,
    /// Used by `poll_remote_jobs` to query remote job status.
    pub remote_executor: Option<Arc<dyn RemoteJobExecutor>>,
}

impl Default for JobServiceOptions {
    fn default() -> Self {
        let config = ServiceConfig::default();
        Self {
            host: host_name(),
            clock: Arc::new(SystemClock),
            worker_pool_size: config.worker_pool_size,
            dispatch_queue_capacity: config.dispatch_queue_capacity,
            execution_enabled: config.execution_enabled,
            remote_executor: None,
        }
    }
}

impl JobServiceOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            host: config.host_name.clone().unwrap_or_else(host_name),
            worker_pool_size: config.worker_pool_size,
            dispatch_queue_capacity: config.dispatch_queue_capacity,
            execution_enabled: config.execution_enabled,
            ..Default::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn remote_executor(mut self, executor: Arc<dyn RemoteJobExecutor>) -> Self {
        self.remote_executor = Some(executor);
        self
    }
}

// ---------------------------------------------------------------------------
// JobService
// ---------------------------------------------------------------------------

/// The scheduler: admission, dispatch, queue draining, remote polling and
/// timeout sweeping over a shared job store.
///
/// Several processes (hosts) may each run a `JobService` over the same store;
/// the store's slot claims keep at most one QUEUED and one RUNNING record per
/// job name across all of them.
pub struct JobService {
    repository: Arc<dyn JobInfoRepository>,
    registry: RunnableRegistry,
    constraints: ConstraintSet,
    pool: DispatchPool,
    remote_executor: Option<Arc<dyn RemoteJobExecutor>>,
    clock: Arc<dyn Clock>,
    host: String,
    execution_enabled: AtomicBool,
}

impl JobService {
    /// Must be called inside a tokio runtime; spawns the dispatch workers.
    pub fn new(repository: Arc<dyn JobInfoRepository>, options: JobServiceOptions) -> Self {
        tracing::info!(
            "Job service on host '{}' with {} dispatch workers",
            options.host,
            options.worker_pool_size.max(1)
        );
        Self {
            repository,
            registry: RunnableRegistry::new(),
            constraints: ConstraintSet::new(),
            pool: DispatchPool::new(options.worker_pool_size, options.dispatch_queue_capacity),
            remote_executor: options.remote_executor,
            clock: options.clock,
            host: options.host,
            execution_enabled: AtomicBool::new(options.execution_enabled),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn repository(&self) -> &Arc<dyn JobInfoRepository> {
        &self.repository
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Returns `false` if a job with this name is already registered.
    pub fn register_job(&self, descriptor: JobDescriptor) -> bool {
        let name = descriptor.name.clone();
        let added = self.registry.register(descriptor);
        if added {
            tracing::info!("Registered job '{}'", name);
        } else {
            tracing::debug!("Job '{}' already registered", name);
        }
        added
    }

    /// See [`ConstraintSet::add`].
    pub fn add_running_constraint<I, S>(&self, names: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let added = self.constraints.add(group.clone(), &self.registry)?;
        if added {
            tracing::info!("Added running constraint {:?}", group);
        }
        Ok(added)
    }

    pub fn list_job_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn list_running_constraints(&self) -> Vec<BTreeSet<String>> {
        self.constraints.list()
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<JobDescriptor>> {
        self.registry.get(name)
    }

    /// Empty the registry and constraint set. The store is untouched.
    pub fn clean(&self) {
        self.registry.clear();
        self.constraints.clear();
        tracing::info!("Cleared registered jobs and running constraints");
    }

    pub fn set_execution_enabled(&self, enabled: bool) {
        let previous = self.execution_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(
                "Job execution {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn is_execution_enabled(&self) -> bool {
        self.execution_enabled.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Start `name` now, or queue it when it cannot run right now.
    ///
    /// Returns the id of the RUNNING or QUEUED record that was created. The
    /// job itself runs on the dispatch pool after this returns.
    pub async fn execute_job(&self, name: &str, force: bool) -> Result<Uuid> {
        if !self.is_execution_enabled() {
            return Err(JobServiceError::ExecutionDisabled(name.to_string()));
        }
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| JobServiceError::NotRegistered(name.to_string()))?;
        if !force && !descriptor.is_execution_necessary() {
            return Err(JobServiceError::ExecutionNotNecessary(name.to_string()));
        }
        if self.repository.has_job(name, RunningState::Queued).await? {
            return Err(JobServiceError::AlreadyQueued(name.to_string()));
        }

        if self.repository.has_job(name, RunningState::Running).await?
            || self
                .constraints
                .is_blocked(name, self.repository.as_ref())
                .await?
        {
            let queued = NewJobInfo::new(name, RunningState::Queued, descriptor.max_execution_time)
                .force_execution(force);
            return match self.repository.create(queued).await? {
                Some(id) => {
                    tracing::info!("Job '{}' cannot run now, queued as {}", name, id);
                    Ok(id)
                }
                None => Err(JobServiceError::AlreadyQueued(name.to_string())),
            };
        }

        let running = NewJobInfo::new(name, RunningState::Running, descriptor.max_execution_time)
            .force_execution(true)
            .executed_by(self.host.as_str(), thread_label());
        let id = self
            .repository
            .create(running)
            .await?
            .ok_or_else(|| JobServiceError::AlreadyRunning(name.to_string()))?;

        self.dispatch(descriptor, id).await?;
        Ok(id)
    }

    /// Promote and dispatch queued records, oldest first. Returns how many
    /// were dispatched.
    pub async fn execute_queued_jobs(&self) -> Result<usize> {
        if !self.is_execution_enabled() {
            tracing::debug!("Execution disabled, not draining the queue");
            return Ok(0);
        }

        let mut dispatched = 0;
        for job in self.repository.find_queued_sorted_by_created_at().await? {
            let name = job.name.as_str();
            let Some(descriptor) = self.registry.get(name) else {
                tracing::debug!("Queued job '{}' is not registered here, skipping", name);
                continue;
            };
            if self.repository.has_job(name, RunningState::Running).await?
                || self
                    .constraints
                    .is_blocked(name, self.repository.as_ref())
                    .await?
            {
                tracing::debug!("Queued job '{}' cannot run yet", name);
                continue;
            }

            if !job.force_execution && !descriptor.is_execution_necessary() {
                // Consume the slot so the queue drains
                if self.repository.activate_queued(name).await? {
                    self.repository
                        .mark_finished(name, ResultState::NotExecuted, None)
                        .await?;
                    tracing::info!("Queued job '{}' ({}) not necessary, skipped", name, job.id);
                }
                continue;
            }

            if !self.repository.activate_queued(name).await? {
                tracing::debug!("Queued job '{}' was activated elsewhere", name);
                continue;
            }
            self.repository
                .update_host_thread(name, &self.host, &thread_label())
                .await?;
            self.dispatch(descriptor, job.id).await?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    async fn dispatch(&self, descriptor: Arc<JobDescriptor>, id: Uuid) -> Result<()> {
        let name = descriptor.name.clone();
        let task = run_dispatched(
            descriptor,
            id,
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
        );
        if let Err(e) = self.pool.submit(Box::pin(task)).await {
            tracing::error!("Could not dispatch job '{}' ({}): {:#}", name, id, e);
            self.repository.mark_finished_with_error(&name, &e).await?;
            return Err(e.into());
        }
        tracing::debug!("Dispatched job '{}' ({})", name, id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tickers
    // -----------------------------------------------------------------------

    /// Poll every registered remote job once. Returns how many were finished.
    ///
    /// A failure polling one job is logged and does not stop the others.
    pub async fn poll_remote_jobs(&self) -> Result<usize> {
        let remote = self.registry.remote_descriptors();
        if remote.is_empty() {
            return Ok(0);
        }
        let Some(executor) = self.remote_executor.as_deref() else {
            tracing::warn!("Remote jobs registered but no remote executor configured");
            return Ok(0);
        };

        let poller = RemotePoller::new(self.repository.as_ref(), executor, self.clock.as_ref());
        let mut finished = 0;
        for descriptor in remote {
            match poller.poll(&descriptor).await {
                Ok(outcome) if outcome.is_terminal() => finished += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(
                    "Failed to poll remote job '{}': {:#}",
                    descriptor.name,
                    e
                ),
            }
        }
        Ok(finished)
    }

    pub async fn cleanup_timed_out_jobs(&self) -> Result<usize> {
        Ok(self.repository.cleanup_timed_out().await?)
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Fail every RUNNING record of a registered job that this host executes.
    /// Records owned by other hosts are left alone.
    pub async fn shutdown(&self) -> Result<usize> {
        let mut failed = 0;
        for name in self.registry.names() {
            let Some(job) = self
                .repository
                .find_by_name_and_state(&name, RunningState::Running)
                .await?
            else {
                continue;
            };
            if job.host.as_deref() != Some(self.host.as_str()) {
                continue;
            }
            if self
                .repository
                .mark_finished(&name, ResultState::Failed, Some(SHUTDOWN_MESSAGE))
                .await?
            {
                tracing::info!("Marked running job '{}' ({}) as failed on shutdown", name, job.id);
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Stop accepting dispatches and wait up to `grace` for in-flight jobs.
    pub async fn drain(&self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }
}

/// Body of a dispatched job: run it and record the outcome.
async fn run_dispatched(
    descriptor: Arc<JobDescriptor>,
    id: Uuid,
    repository: Arc<dyn JobInfoRepository>,
    clock: Arc<dyn Clock>,
) {
    let name = descriptor.name.as_str();
    let logger = JobLogger::new(name, id, Arc::clone(&repository), clock);
    tracing::info!("Job '{}' ({}) started", name, id);

    let recorded = match (descriptor.kind, descriptor.runnable().execute(&logger).await) {
        (JobKind::Local, Ok(())) => repository.mark_finished_successfully(name).await,
        (JobKind::Remote { .. }, Ok(())) => {
            tracing::info!("Remote job '{}' ({}) started, awaiting completion", name, id);
            return;
        }
        (_, Err(e)) => {
            tracing::warn!("Job '{}' ({}) failed: {:#}", name, id, e);
            repository.mark_finished_with_error(name, &e).await
        }
    };

    match recorded {
        Ok(true) => tracing::info!("Job '{}' ({}) finished", name, id),
        Ok(false) => tracing::warn!(
            "Job '{}' ({}) was no longer running when it finished",
            name,
            id
        ),
        Err(e) => tracing::error!("Failed to record outcome of job '{}' ({}): {:#}", name, id, e),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
