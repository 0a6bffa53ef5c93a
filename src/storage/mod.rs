pub mod json;
pub mod memory;
pub mod table;

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{JobInfo, NewJobInfo, ResultState, RunningState};

pub use json::JsonJobInfoRepository;
pub use memory::InMemoryJobInfoRepository;
pub use table::JobInfoTable;

/// Persistent collection of job records.
///
/// `create` and `activate_queued` are the only ways a record enters a slot;
/// both are atomic test-and-set operations across every process sharing the
/// store. All per-name mutators target the RUNNING record of that name and
/// bump its `last_modified_at`.
#[async_trait]
pub trait JobInfoRepository: Send + Sync {
    /// Claim the `(name, state)` slot. `None` when it is already taken.
    async fn create(&self, new: NewJobInfo) -> Result<Option<Uuid>>;
    async fn activate_queued(&self, name: &str) -> Result<bool>;
    async fn has_job(&self, name: &str, state: RunningState) -> Result<bool>;
    async fn find_by_name_and_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> Result<Option<JobInfo>>;
    async fn find_queued_sorted_by_created_at(&self) -> Result<Vec<JobInfo>>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobInfo>>;
    async fn find_by_name(&self, name: &str) -> Result<Vec<JobInfo>>;
    async fn find_last_by_name(&self, name: &str) -> Result<Option<JobInfo>>;
    async fn distinct_job_names(&self) -> Result<Vec<String>>;
    async fn remove_queued(&self, name: &str) -> Result<bool>;
    async fn mark_finished(
        &self,
        name: &str,
        result: ResultState,
        message: Option<&str>,
    ) -> Result<bool>;

    async fn mark_finished_successfully(&self, name: &str) -> Result<bool> {
        self.mark_finished(name, ResultState::Successful, None).await
    }

    async fn mark_finished_with_error(&self, name: &str, error: &anyhow::Error) -> Result<bool> {
        let message = format!("{:?}", error);
        self.mark_finished(name, ResultState::Error, Some(&message))
            .await
    }

    async fn append_log_line(&self, name: &str, line: &str) -> Result<bool>;
    async fn set_log_lines(&self, name: &str, lines: Vec<String>) -> Result<bool>;
    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> Result<bool>;
    async fn update_host_thread(&self, name: &str, host: &str, thread: &str) -> Result<bool>;
    /// Returns how many RUNNING records were marked TIMED_OUT.
    async fn cleanup_timed_out(&self) -> Result<usize>;
    /// Remove every record; with `drop_all` the backing storage goes too.
    async fn clear(&self, drop_all: bool) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

/// Access to a [`JobInfoTable`] under the backend's own locking discipline.
///
/// Implementors get [`JobInfoRepository`] for free.
pub trait TableBackend: Send + Sync {
    fn clock(&self) -> &dyn Clock;

    fn read<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send
    where
        F: FnOnce(&JobInfoTable) -> R + Send + 'static,
        R: Send + 'static;

    /// Runs `f` with exclusive access; changes are durable once this returns.
    fn write<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send
    where
        F: FnOnce(&mut JobInfoTable) -> Result<R> + Send + 'static,
        R: Send + 'static;

    fn drop_storage(&self) -> impl Future<Output = Result<()>> + Send;
}

#[async_trait]
impl<B: TableBackend> JobInfoRepository for B {
    async fn create(&self, new: NewJobInfo) -> Result<Option<Uuid>> {
        let now = self.clock().now();
        self.write(move |t| t.create(new, now)).await
    }

    async fn activate_queued(&self, name: &str) -> Result<bool> {
        let now = self.clock().now();
        let name = name.to_string();
        self.write(move |t| Ok(t.activate_queued(&name, now))).await
    }

    async fn has_job(&self, name: &str, state: RunningState) -> Result<bool> {
        let name = name.to_string();
        self.read(move |t| t.has_job(&name, state)).await
    }

    async fn find_by_name_and_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> Result<Option<JobInfo>> {
        let name = name.to_string();
        self.read(move |t| t.find_by_name_and_state(&name, state))
            .await
    }

    async fn find_queued_sorted_by_created_at(&self) -> Result<Vec<JobInfo>> {
        self.read(|t| t.find_queued_sorted_by_created_at()).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobInfo>> {
        self.read(move |t| t.find_by_id(id)).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<JobInfo>> {
        let name = name.to_string();
        self.read(move |t| t.find_by_name(&name)).await
    }

    async fn find_last_by_name(&self, name: &str) -> Result<Option<JobInfo>> {
        let name = name.to_string();
        self.read(move |t| t.find_by_name(&name).into_iter().next())
            .await
    }

    async fn distinct_job_names(&self) -> Result<Vec<String>> {
        self.read(|t| t.distinct_job_names()).await
    }

    async fn remove_queued(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.write(move |t| Ok(t.remove_queued(&name))).await
    }

    async fn mark_finished(
        &self,
        name: &str,
        result: ResultState,
        message: Option<&str>,
    ) -> Result<bool> {
        let now = self.clock().now();
        let name = name.to_string();
        let message = message.map(str::to_string);
        self.write(move |t| Ok(t.mark_finished(&name, result, message.as_deref(), now)))
            .await
    }

    async fn append_log_line(&self, name: &str, line: &str) -> Result<bool> {
        let now = self.clock().now();
        let name = name.to_string();
        let line = line.to_string();
        self.write(move |t| Ok(t.append_log_line(&name, &line, now)))
            .await
    }

    async fn set_log_lines(&self, name: &str, lines: Vec<String>) -> Result<bool> {
        let now = self.clock().now();
        let name = name.to_string();
        self.write(move |t| Ok(t.set_log_lines(&name, lines, now)))
            .await
    }

    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> Result<bool> {
        let now = self.clock().now();
        let (name, key, value) = (name.to_string(), key.to_string(), value.to_string());
        self.write(move |t| Ok(t.add_additional_data(&name, &key, &value, now)))
            .await
    }

    async fn update_host_thread(&self, name: &str, host: &str, thread: &str) -> Result<bool> {
        let now = self.clock().now();
        let (name, host, thread) = (name.to_string(), host.to_string(), thread.to_string());
        self.write(move |t| Ok(t.update_host_thread(&name, &host, &thread, now)))
            .await
    }

    async fn cleanup_timed_out(&self) -> Result<usize> {
        let now = self.clock().now();
        let swept = self.write(move |t| Ok(t.cleanup_timed_out(now))).await?;
        for name in &swept {
            tracing::warn!("Job '{}' timed out", name);
        }
        Ok(swept.len())
    }

    async fn clear(&self, drop_all: bool) -> Result<()> {
        if drop_all {
            return self.drop_storage().await;
        }
        self.write(|t| {
            t.clear();
            Ok(())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.read(|t| t.count()).await
    }
}
