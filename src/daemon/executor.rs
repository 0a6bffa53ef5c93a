use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

/// A dispatched unit of work: runs a job and records its outcome.
pub type DispatchTask = BoxFuture<'static, ()>;

/// Fixed set of workers draining a bounded task queue.
///
/// `submit` returns once the task is queued, before it runs. When the queue is
/// full `submit` waits for a free slot instead of spawning more work.
pub struct DispatchPool {
    tx: StdMutex<Option<mpsc::Sender<DispatchTask>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl DispatchPool {
    /// Spawn `size` workers on the current tokio runtime.
    pub fn new(size: usize, capacity: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<DispatchTask>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    // Owned by the worker: aborting the worker drops the set,
                    // which aborts the job it is running.
                    let mut running = JoinSet::new();
                    loop {
                        // Hold the receiver lock only while waiting for the next task
                        let next = { rx.lock().await.recv().await };
                        let Some(task) = next else {
                            break;
                        };
                        // Run on its own task so a panicking job does not take the worker down
                        running.spawn(task);
                        if let Some(Err(e)) = running.join_next().await {
                            tracing::error!("Dispatch worker {} task failed: {}", worker_id, e);
                        }
                    }
                    tracing::debug!("Dispatch worker {} stopped", worker_id);
                })
            })
            .collect();

        tracing::debug!("Dispatch pool started with {} workers", size);
        Self {
            tx: StdMutex::new(Some(tx)),
            workers: StdMutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub async fn submit(&self, task: DispatchTask) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Dispatch pool is shut down"))?;
        tx.send(task)
            .await
            .map_err(|_| anyhow::anyhow!("Dispatch pool is shut down"))
    }

    /// Stop accepting tasks and wait up to `grace` for queued and running
    /// tasks to finish. Workers still busy after that are aborted together
    /// with the jobs they are running; queued tasks that never started are dropped.
    pub async fn shutdown(&self, grace: Duration) {
        drop(self.tx.lock().unwrap_or_else(|e| e.into_inner()).take());

        let mut workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        if workers.is_empty() {
            return;
        }

        let joined = tokio::time::timeout(
            grace,
            futures_util::future::join_all(workers.iter_mut()),
        )
        .await;
        if joined.is_err() {
            tracing::warn!(
                "Dispatch pool did not drain within {:?}, aborting workers",
                grace
            );
            for worker in &workers {
                worker.abort();
            }
            // Wait until the aborted workers and their jobs are dropped. Handles
            // already joined above must not be polled again.
            let aborted = workers.into_iter().filter(|w| !w.is_finished());
            futures_util::future::join_all(aborted).await;
        } else {
            tracing::info!("Dispatch pool drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{oneshot, Barrier};

    #[tokio::test]
    async fn test_submit_returns_before_task_runs() {
        let pool = DispatchPool::new(1, 4);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        pool.submit(Box::pin(async move {
            let _ = release_rx.await;
            let _ = done_tx.send(());
        }))
        .await
        .expect("submit");

        // Submission completed while the task is still parked
        release_tx.send(()).expect("release");
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("task finished")
            .expect("done");
    }

    #[tokio::test]
    async fn test_tasks_run_concurrently_up_to_pool_size() {
        let pool = DispatchPool::new(3, 8);
        let barrier = Arc::new(Barrier::new(4));

        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            pool.submit(Box::pin(async move {
                barrier.wait().await;
            }))
            .await
            .expect("submit");
        }

        // All three workers must be inside the barrier at the same time
        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .expect("three tasks ran concurrently");
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let pool = DispatchPool::new(1, 4);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(Box::pin(async {
            panic!("job blew up");
        }))
            .await
            .expect("submit");

        let c = Arc::clone(&counter);
        pool.submit(Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .expect("submit");

        pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_then_rejects() {
        let pool = DispatchPool::new(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("submit");
        }

        pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(pool.submit(Box::pin(async {})).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_job_still_running_after_grace() {
        let pool = DispatchPool::new(1, 4);
        let completed = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let flag = Arc::clone(&completed);
        pool.submit(Box::pin(async move {
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
        }))
        .await
        .expect("submit");
        started_rx.await.expect("job started");

        pool.shutdown(Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let pool = DispatchPool::new(0, 0);
            assert_eq!(pool.size(), 1);
            pool.submit(Box::pin(async {})).await.expect("submit");
            pool.shutdown(Duration::from_secs(1)).await;
        });
    }
}
