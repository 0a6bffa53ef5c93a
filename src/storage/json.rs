use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::clock::{Clock, SystemClock};
use crate::models::JobInfo;
use crate::storage::{JobInfoTable, TableBackend};

/// File-backed store shared by every host pointing at the same path.
///
/// Each operation takes an advisory lock on `<file>.lock` (shared for reads,
/// exclusive for writes), reloads the file, and for writes persists it again
/// before releasing the lock. That makes `create` and `activate_queued`
/// atomic across processes.
pub struct JsonJobInfoRepository {
    file_path: PathBuf,
    lock_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl JsonJobInfoRepository {
    /// Open (or create) the store at `file_path`.
    ///
    /// If the file is corrupted (invalid JSON), a backup is written to
    /// `<file>.bak`, a warning is logged, and the store starts empty.
    pub async fn open(file_path: PathBuf) -> Result<Self> {
        Self::open_with_clock(file_path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(file_path: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create store directory")?;
        }

        let lock_path = sibling(&file_path, "lock");
        let repo = Self {
            file_path,
            lock_path,
            clock,
        };

        // Validate (and back up if needed) once up front, under the exclusive lock
        let count = repo.write(|t| Ok(t.count())).await?;
        tracing::debug!(
            "Opened job store {} with {} records",
            repo.file_path.display(),
            count
        );
        Ok(repo)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    async fn locked<R, F>(&self, exclusive: bool, f: F) -> Result<R>
    where
        F: FnOnce(&Path) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let file_path = self.file_path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            let lock = acquire(&lock_path, exclusive)?;
            let result = f(&file_path);
            release(&lock);
            result
        })
        .await
        .context("Job store task panicked")?
    }
}

impl TableBackend for JsonJobInfoRepository {
    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&JobInfoTable) -> R + Send + 'static,
        R: Send + 'static,
    {
        let attempt = self
            .locked(false, move |path| match load(path)? {
                Loaded::Table(table) => Ok(Ok(f(&table))),
                Loaded::Corrupted(_) => Ok(Err(f)),
            })
            .await?;
        match attempt {
            Ok(result) => Ok(result),
            // Repairing rewrites the file, so only do it under the exclusive lock
            Err(f) => {
                self.locked(true, move |path| {
                    let table = load_or_repair(path)?;
                    Ok(f(&table))
                })
                .await
            }
        }
    }

    async fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut JobInfoTable) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.locked(true, move |path| {
            let mut table = load_or_repair(path)?;
            let result = f(&mut table)?;
            if table.is_dirty() {
                persist(path, table.jobs())?;
            }
            Ok(result)
        })
        .await
    }

    async fn drop_storage(&self) -> Result<()> {
        self.locked(true, |path| {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to remove job store file"),
            }
            tracing::info!("Dropped job store {}", path.display());
            Ok(())
        })
        .await
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn acquire(lock_path: &Path, exclusive: bool) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
    if exclusive {
        fs4::fs_std::FileExt::lock_exclusive(&file)
    } else {
        fs4::fs_std::FileExt::lock_shared(&file)
    }
    .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
    Ok(file)
}

fn release(file: &File) {
    if let Err(e) = fs4::fs_std::FileExt::unlock(file) {
        tracing::warn!("Failed to unlock job store: {}", e);
    }
}

enum Loaded {
    Table(JobInfoTable),
    Corrupted(serde_json::Error),
}

fn load(path: &Path) -> Result<Loaded> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Loaded::Table(JobInfoTable::new()))
        }
        Err(e) => return Err(e).context("Failed to read job store"),
    };
    if content.trim().is_empty() {
        return Ok(Loaded::Table(JobInfoTable::new()));
    }

    Ok(match serde_json::from_str::<Vec<JobInfo>>(&content) {
        Ok(jobs) => Loaded::Table(JobInfoTable::from_jobs(jobs)),
        Err(e) => Loaded::Corrupted(e),
    })
}

/// Load the table, replacing a corrupted file with an empty store.
/// Caller must hold the exclusive lock.
fn load_or_repair(path: &Path) -> Result<JobInfoTable> {
    match load(path)? {
        Loaded::Table(table) => Ok(table),
        Loaded::Corrupted(e) => {
            // Corrupted JSON: keep a backup and start from an empty table
            tracing::warn!(
                "{} is corrupted ({}), creating backup and starting empty",
                path.display(),
                e
            );
            let backup_path = sibling(path, "bak");
            if let Err(backup_err) = std::fs::copy(path, &backup_path) {
                tracing::error!("Failed to back up corrupted job store: {}", backup_err);
            }
            let empty = JobInfoTable::new();
            persist(path, empty.jobs())?;
            Ok(empty)
        }
    }
}

/// Write to a .tmp file first, then rename over the store.
fn persist(path: &Path, jobs: &[JobInfo]) -> Result<()> {
    let tmp_path = sibling(path, "tmp");
    let json = serde_json::to_string_pretty(jobs).context("Failed to serialize job store")?;
    std::fs::write(&tmp_path, json.as_bytes()).context("Failed to write temporary store file")?;
    std::fs::rename(&tmp_path, path).context("Failed to rename temporary store file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::models::{NewJobInfo, ResultState, RunningState};
    use crate::storage::JobInfoRepository;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    fn clock() -> FakeClock {
        FakeClock::new(Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap())
    }

    async fn setup() -> (JsonJobInfoRepository, FakeClock, TempDir) {
        let tmp = TempDir::new().expect("tempdir");
        let clock = clock();
        let repo = JsonJobInfoRepository::open_with_clock(
            tmp.path().join("jobs.json"),
            Arc::new(clock.clone()),
        )
        .await
        .expect("open");
        (repo, clock, tmp)
    }

    fn running(name: &str) -> NewJobInfo {
        NewJobInfo::new(name, RunningState::Running, Duration::from_secs(60))
            .executed_by("host-a", "worker-1")
    }

    #[tokio::test]
    async fn test_open_empty() {
        let (repo, _clock, _tmp) = setup().await;
        assert_eq!(repo.count().await.expect("count"), 0);
        assert!(repo
            .find_queued_sorted_by_created_at()
            .await
            .expect("find")
            .is_empty());
    }

    #[tokio::test]
    async fn test_records_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("jobs.json");

        let id = {
            let repo = JsonJobInfoRepository::open(path.clone()).await.unwrap();
            let id = repo.create(running("import")).await.unwrap().unwrap();
            repo.append_log_line("import", "started").await.unwrap();
            id
        };

        let repo = JsonJobInfoRepository::open(path).await.unwrap();
        let job = repo.find_by_id(id).await.unwrap().expect("persisted");
        assert_eq!(job.state, RunningState::Running);
        assert_eq!(job.log_lines, vec!["started"]);
        assert_eq!(job.host.as_deref(), Some("host-a"));
    }

    #[tokio::test]
    async fn test_two_instances_share_slots() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shared").join("jobs.json");
        let a = JsonJobInfoRepository::open(path.clone()).await.unwrap();
        let b = JsonJobInfoRepository::open(path).await.unwrap();

        assert!(a.create(running("import")).await.unwrap().is_some());
        assert!(b.create(running("import")).await.unwrap().is_none());
        assert!(b.has_job("import", RunningState::Running).await.unwrap());

        assert!(b.mark_finished_successfully("import").await.unwrap());
        let last = a.find_last_by_name("import").await.unwrap().unwrap();
        assert_eq!(last.result_state, Some(ResultState::Successful));
    }

    #[tokio::test]
    async fn test_concurrent_activation_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("jobs.json");
        let a = Arc::new(JsonJobInfoRepository::open(path.clone()).await.unwrap());
        let b = Arc::new(JsonJobInfoRepository::open(path).await.unwrap());
        a.create(NewJobInfo::new("import", RunningState::Queued, Duration::from_secs(60)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let repo = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
            handles.push(tokio::spawn(async move {
                repo.activate_queued("import").await.expect("activate")
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(a.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_file_creates_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("jobs.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let repo = JsonJobInfoRepository::open(path.clone()).await.expect("open");
        assert_eq!(repo.count().await.unwrap(), 0);

        let backup = tmp.path().join("jobs.json.bak");
        assert!(backup.exists());
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "{not valid json");
    }

    #[tokio::test]
    async fn test_corrupted_file_is_repaired_only_under_exclusive_lock() {
        let (repo, _clock, tmp) = setup().await;
        repo.create(running("import")).await.unwrap();
        std::fs::write(repo.file_path(), "[{broken").unwrap();

        // Another process holds a shared lock: a read must not rewrite the file
        let other = acquire(&tmp.path().join("jobs.json.lock"), false).expect("shared lock");
        let repo = Arc::new(repo);
        let reader = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { repo.count().await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!reader.is_finished());
        assert_eq!(std::fs::read_to_string(repo.file_path()).unwrap(), "[{broken");
        assert!(!tmp.path().join("jobs.json.bak").exists());

        release(&other);
        drop(other);
        let count = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("read finished")
            .unwrap()
            .expect("count");
        assert_eq!(count, 0);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("jobs.json.bak")).unwrap(),
            "[{broken"
        );
    }

    #[tokio::test]
    async fn test_failed_claim_does_not_rewrite_file() {
        let (repo, _clock, _tmp) = setup().await;
        repo.create(running("import")).await.unwrap();
        let before = std::fs::metadata(repo.file_path()).unwrap().modified().unwrap();
        let content = std::fs::read_to_string(repo.file_path()).unwrap();

        assert!(repo.create(running("import")).await.unwrap().is_none());
        assert!(!repo.activate_queued("import").await.unwrap());

        assert_eq!(std::fs::read_to_string(repo.file_path()).unwrap(), content);
        assert_eq!(
            std::fs::metadata(repo.file_path()).unwrap().modified().unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_cleanup_timed_out_persists() {
        let (repo, clock, _tmp) = setup().await;
        repo.create(running("import")).await.unwrap();
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(repo.cleanup_timed_out().await.unwrap(), 1);

        let reopened = JsonJobInfoRepository::open(repo.file_path().to_path_buf())
            .await
            .unwrap();
        let job = reopened.find_last_by_name("import").await.unwrap().unwrap();
        assert_eq!(job.result_state, Some(ResultState::TimedOut));
    }

    #[tokio::test]
    async fn test_clear_drop_all_removes_file() {
        let (repo, _clock, _tmp) = setup().await;
        repo.create(running("import")).await.unwrap();
        assert!(repo.file_path().exists());

        repo.clear(false).await.unwrap();
        assert!(repo.file_path().exists());
        assert_eq!(repo.count().await.unwrap(), 0);

        repo.create(running("import")).await.unwrap();
        repo.clear(true).await.unwrap();
        assert!(!repo.file_path().exists());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
