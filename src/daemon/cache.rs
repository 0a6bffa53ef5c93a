use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::JobInfo;
use crate::storage::JobInfoRepository;

/// Default time a cached record is served before it is re-read.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Pull-through view of a single job record, refreshed once its TTL lapses.
///
/// Runnables use it to check whether their own record was finished from the
/// outside (timeout sweep, shutdown) without hitting the store on every call.
pub struct JobInfoCache {
    id: Uuid,
    repository: Arc<dyn JobInfoRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: Mutex<Option<(Option<JobInfo>, DateTime<Utc>)>>,
}

impl JobInfoCache {
    pub fn new(
        id: Uuid,
        repository: Arc<dyn JobInfoRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            repository,
            clock,
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn get(&self) -> Result<Option<JobInfo>> {
        let now = self.clock.now();
        let mut entry = self.entry.lock().await;
        if let Some((info, fetched_at)) = entry.as_ref() {
            let age = (now - *fetched_at).to_std().unwrap_or(Duration::ZERO);
            if age < self.ttl {
                return Ok(info.clone());
            }
        }

        let info = self.repository.find_by_id(self.id).await?;
        *entry = Some((info.clone(), now));
        Ok(info)
    }

    /// Drop the cached record so the next read goes to the store.
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }

    pub async fn is_timed_out(&self) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .get()
            .await?
            .map(|info| info.is_timed_out(now))
            .unwrap_or(false))
    }

    /// True once the record left RUNNING, whoever finished it.
    pub async fn is_finished(&self) -> Result<bool> {
        Ok(self
            .get()
            .await?
            .map(|info| info.finished_at.is_some())
            .unwrap_or(false))
    }

    pub async fn additional_data(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .get()
            .await?
            .map(|info| info.additional_data)
            .unwrap_or_default())
    }
}
