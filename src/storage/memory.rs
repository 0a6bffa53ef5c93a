use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::storage::{JobInfoTable, TableBackend};

/// Process-local store. Slot operations are atomic for every scheduler in this
/// process; use [`crate::storage::JsonJobInfoRepository`] to coordinate hosts.
pub struct InMemoryJobInfoRepository {
    table: RwLock<JobInfoTable>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobInfoRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: RwLock::new(JobInfoTable::new()),
            clock,
        }
    }
}

impl Default for InMemoryJobInfoRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBackend for InMemoryJobInfoRepository {
    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&JobInfoTable) -> R + Send + 'static,
        R: Send + 'static,
    {
        let table = self.table.read().await;
        Ok(f(&table))
    }

    async fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut JobInfoTable) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut table = self.table.write().await;
        f(&mut table)
    }

    async fn drop_storage(&self) -> Result<()> {
        *self.table.write().await = JobInfoTable::new();
        Ok(())
    }
}
