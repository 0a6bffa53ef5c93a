use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// Source of "now" for store timestamps, timeout detection and polling intervals.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock backed by system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for deterministic testing; time only advances when told to.
/// Uses std::sync::RwLock so it can be read from sync and async code alike.
#[derive(Clone)]
pub struct FakeClock {
    time: Arc<RwLock<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(RwLock::new(time)),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.write().unwrap_or_else(|e| e.into_inner()) = time;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut t = self.time.write().unwrap_or_else(|e| e.into_inner());
        *t += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(|e| e.into_inner())
    }
}
