use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::daemon::logger::JobLogger;

/// The work behind a registered job.
///
/// For local jobs `execute` performs the work and its result finishes the
/// record. For remote jobs `execute` only starts the remote side and records
/// where to poll it; the remote poller finishes the record later and calls
/// `execute_on_success` when the remote side reports success.
#[async_trait]
pub trait JobRunnable: Send + Sync {
    async fn execute(&self, logger: &JobLogger) -> anyhow::Result<()>;

    async fn execute_on_success(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type Precondition = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Local,
    Remote { polling_interval: Duration },
}

/// Everything the scheduler needs to know about one job name.
#[derive(Clone)]
pub struct JobDescriptor {
    pub name: String,
    pub max_execution_time: Duration,
    pub kind: JobKind,
    /// Retry metadata for the runnable's own use; the scheduler never retries.
    pub max_retries: u32,
    pub retry_interval: Option<Duration>,
    precondition: Option<Precondition>,
    runnable: Arc<dyn JobRunnable>,
}

impl JobDescriptor {
    pub fn local(
        name: impl Into<String>,
        max_execution_time: Duration,
        runnable: Arc<dyn JobRunnable>,
    ) -> Self {
        Self {
            name: name.into(),
            max_execution_time,
            kind: JobKind::Local,
            max_retries: 0,
            retry_interval: None,
            precondition: None,
            runnable,
        }
    }

    pub fn remote(
        name: impl Into<String>,
        max_execution_time: Duration,
        polling_interval: Duration,
        runnable: Arc<dyn JobRunnable>,
    ) -> Self {
        Self {
            kind: JobKind::Remote { polling_interval },
            ..Self::local(name, max_execution_time, runnable)
        }
    }

    /// Cheap check consulted before every non-forced execution.
    pub fn with_precondition(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.precondition = Some(Arc::new(check));
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_interval: Option<Duration>) -> Self {
        self.max_retries = max_retries;
        self.retry_interval = retry_interval;
        self
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, JobKind::Remote { .. })
    }

    pub fn polling_interval(&self) -> Option<Duration> {
        match self.kind {
            JobKind::Remote { polling_interval } => Some(polling_interval),
            JobKind::Local => None,
        }
    }

    pub fn is_execution_necessary(&self) -> bool {
        self.precondition.as_ref().map_or(true, |check| check())
    }

    pub fn runnable(&self) -> &Arc<dyn JobRunnable> {
        &self.runnable
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("max_execution_time", &self.max_execution_time)
            .field("kind", &self.kind)
            .field("max_retries", &self.max_retries)
            .field("retry_interval", &self.retry_interval)
            .field("has_precondition", &self.precondition.is_some())
            .finish()
    }
}

/// Process-local map from job name to descriptor. Write-once per name.
#[derive(Default)]
pub struct RunnableRegistry {
    jobs: RwLock<HashMap<String, Arc<JobDescriptor>>>,
}

impl RunnableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the name is already registered; the first
    /// registration wins.
    pub fn register(&self, descriptor: JobDescriptor) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&descriptor.name) {
            return false;
        }
        jobs.insert(descriptor.name.clone(), Arc::new(descriptor));
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDescriptor>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> Vec<Arc<JobDescriptor>> {
        let mut all: Vec<Arc<JobDescriptor>> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn remote_descriptors(&self) -> Vec<Arc<JobDescriptor>> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.is_remote())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.jobs.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
