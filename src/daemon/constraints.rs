use std::collections::BTreeSet;
use std::sync::RwLock;

use anyhow::Result;

use crate::daemon::registry::RunnableRegistry;
use crate::errors::JobServiceError;
use crate::models::RunningState;
use crate::storage::JobInfoRepository;

/// Groups of job names that must never run at the same time.
///
/// Groups are only ever added; equivalent groups are kept as given.
#[derive(Default)]
pub struct ConstraintSet {
    groups: RwLock<Vec<BTreeSet<String>>>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group. Every member must be registered. A group with fewer than
    /// two distinct names constrains nothing and is ignored (`Ok(false)`).
    pub fn add(
        &self,
        group: BTreeSet<String>,
        registry: &RunnableRegistry,
    ) -> Result<bool, JobServiceError> {
        if let Some(unknown) = group.iter().find(|name| !registry.contains(name)) {
            return Err(JobServiceError::UnknownJob(unknown.clone()));
        }
        if group.len() < 2 {
            return Ok(false);
        }
        self.groups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(group);
        Ok(true)
    }

    pub fn list(&self) -> Vec<BTreeSet<String>> {
        self.groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Other names sharing at least one group with `name`.
    pub fn constrained_with(&self, name: &str) -> BTreeSet<String> {
        self.groups
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|group| group.contains(name))
            .flat_map(|group| group.iter())
            .filter(|other| other.as_str() != name)
            .cloned()
            .collect()
    }

    /// True iff another member of one of `name`'s groups has a RUNNING record.
    pub async fn is_blocked(&self, name: &str, repository: &dyn JobInfoRepository) -> Result<bool> {
        for other in self.constrained_with(name) {
            if repository.has_job(&other, RunningState::Running).await? {
                tracing::debug!("Job '{}' is blocked by running job '{}'", name, other);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn clear(&self) {
        self.groups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
