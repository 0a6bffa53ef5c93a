use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::clock::Clock;
use crate::daemon::cache::{JobInfoCache, DEFAULT_CACHE_TTL};
use crate::storage::JobInfoRepository;

/// Handed to a runnable's `execute`. Writes go to the RUNNING record of the
/// job's name; once that record is finished they are silently dropped.
pub struct JobLogger {
    name: String,
    id: Uuid,
    repository: Arc<dyn JobInfoRepository>,
    cache: JobInfoCache,
}

impl JobLogger {
    pub fn new(
        name: impl Into<String>,
        id: Uuid,
        repository: Arc<dyn JobInfoRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = JobInfoCache::new(id, Arc::clone(&repository), clock, DEFAULT_CACHE_TTL);
        Self {
            name: name.into(),
            id,
            repository,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn add_log_line(&self, line: impl AsRef<str>) -> Result<()> {
        let line = line.as_ref();
        if !self.repository.append_log_line(&self.name, line).await? {
            tracing::debug!("Dropped log line for '{}' ({}): not running", self.name, self.id);
        }
        Ok(())
    }

    pub async fn insert_or_update_additional_data(&self, key: &str, value: &str) -> Result<()> {
        if !self
            .repository
            .add_additional_data(&self.name, key, value)
            .await?
        {
            tracing::warn!(
                "Could not store additional data '{}' for '{}' ({}): not running",
                key,
                self.name,
                self.id
            );
        }
        self.cache.invalidate().await;
        Ok(())
    }

    pub async fn additional_data(&self) -> Result<BTreeMap<String, String>> {
        self.cache.additional_data().await
    }

    /// Long-running jobs check this to stop early once their record was
    /// finished from outside (timeout sweep, shutdown).
    pub async fn is_aborted(&self) -> Result<bool> {
        Ok(self.cache.is_finished().await? || self.cache.is_timed_out().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::{NewJobInfo, RunningState};
    use crate::storage::InMemoryJobInfoRepository;
    use std::time::Duration;

    async fn setup() -> (Arc<dyn JobInfoRepository>, JobLogger) {
        let repo: Arc<dyn JobInfoRepository> = Arc::new(InMemoryJobInfoRepository::new());
        let id = repo
            .create(NewJobInfo::new(
                "import",
                RunningState::Running,
                Duration::from_secs(60),
            ))
            .await
            .unwrap()
            .unwrap();
        let logger = JobLogger::new("import", id, Arc::clone(&repo), Arc::new(SystemClock));
        (repo, logger)
    }

    #[tokio::test]
    async fn test_log_lines_land_on_running_record() {
        let (repo, logger) = setup().await;
        logger.add_log_line("step 1").await.unwrap();
        logger.add_log_line("step 2").await.unwrap();

        let job = repo.find_by_id(logger.id()).await.unwrap().unwrap();
        assert_eq!(job.log_lines, vec!["step 1", "step 2"]);
    }

    #[tokio::test]
    async fn test_additional_data_is_visible_immediately() {
        let (_repo, logger) = setup().await;
        assert!(logger.additional_data().await.unwrap().is_empty());
        logger
            .insert_or_update_additional_data("rows", "42")
            .await
            .unwrap();
        let data = logger.additional_data().await.unwrap();
        assert_eq!(data.get("rows").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn test_writes_after_finish_are_dropped() {
        let (repo, logger) = setup().await;
        repo.mark_finished_successfully("import").await.unwrap();
        logger.add_log_line("late").await.expect("no error");
        let job = repo.find_by_id(logger.id()).await.unwrap().unwrap();
        assert!(job.log_lines.is_empty());
        assert!(logger.is_aborted().await.unwrap());
    }
}
