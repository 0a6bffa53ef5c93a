use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{JobInfo, NewJobInfo, ResultState, RunningState};

/// The job records plus the slot discipline over them.
///
/// Both store backends hold one of these; the file backend reloads it under an
/// exclusive lock for every mutation. Only QUEUED and RUNNING records are ever
/// mutated, and at most one record exists per `(name, QUEUED)` and
/// `(name, RUNNING)`.
#[derive(Debug, Default, Clone)]
pub struct JobInfoTable {
    jobs: Vec<JobInfo>,
    dirty: bool,
}

impl JobInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_jobs(jobs: Vec<JobInfo>) -> Self {
        Self { jobs, dirty: false }
    }

    pub fn jobs(&self) -> &[JobInfo] {
        &self.jobs
    }

    /// True once any mutation changed the table since it was loaded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn find(&self, name: &str, state: RunningState) -> Option<&JobInfo> {
        self.jobs
            .iter()
            .find(|j| j.name == name && j.state == state)
    }

    fn running_mut(&mut self, name: &str) -> Option<&mut JobInfo> {
        self.jobs
            .iter_mut()
            .find(|j| j.name == name && j.state == RunningState::Running)
    }

    /// Slot claim. Returns `None` if `(name, state)` is already occupied.
    pub fn create(&mut self, new: NewJobInfo, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        if !new.state.is_active() {
            anyhow::bail!(
                "Job '{}' can only be created as QUEUED or RUNNING, not {}",
                new.name,
                new.state
            );
        }
        if self.find(&new.name, new.state).is_some() {
            return Ok(None);
        }

        let running = new.state == RunningState::Running;
        let id = Uuid::now_v7();
        self.jobs.push(JobInfo {
            id,
            name: new.name,
            state: new.state,
            result_state: None,
            host: if running { new.host } else { None },
            thread: if running { new.thread } else { None },
            created_at: now,
            last_modified_at: now,
            finished_at: None,
            max_execution_time_ms: u64::try_from(new.max_execution_time.as_millis())
                .unwrap_or(u64::MAX),
            force_execution: new.force_execution,
            additional_data: new.additional_data,
            log_lines: Vec::new(),
            error_message: None,
        });
        self.dirty = true;
        Ok(Some(id))
    }

    /// Slot promotion: QUEUED -> RUNNING, only while the RUNNING slot is free.
    pub fn activate_queued(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        if self.find(name, RunningState::Running).is_some() {
            return false;
        }
        let Some(job) = self
            .jobs
            .iter_mut()
            .find(|j| j.name == name && j.state == RunningState::Queued)
        else {
            return false;
        };
        job.state = RunningState::Running;
        job.last_modified_at = now;
        job.host = None;
        job.thread = None;
        self.dirty = true;
        true
    }

    pub fn has_job(&self, name: &str, state: RunningState) -> bool {
        self.find(name, state).is_some()
    }

    pub fn find_by_name_and_state(&self, name: &str, state: RunningState) -> Option<JobInfo> {
        self.find(name, state).cloned()
    }

    pub fn find_queued_sorted_by_created_at(&self) -> Vec<JobInfo> {
        let mut queued: Vec<JobInfo> = self
            .jobs
            .iter()
            .filter(|j| j.state == RunningState::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        queued
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<JobInfo> {
        self.jobs.iter().find(|j| j.id == id).cloned()
    }

    /// All records of a name, most recently modified first.
    pub fn find_by_name(&self, name: &str) -> Vec<JobInfo> {
        let mut found: Vec<JobInfo> = self
            .jobs
            .iter()
            .filter(|j| j.name == name)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.last_modified_at
                .cmp(&a.last_modified_at)
                .then(b.id.cmp(&a.id))
        });
        found
    }

    pub fn distinct_job_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.jobs.iter().map(|j| j.name.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }

    pub fn remove_queued(&mut self, name: &str) -> bool {
        let before = self.jobs.len();
        self.jobs
            .retain(|j| !(j.name == name && j.state == RunningState::Queued));
        let removed = self.jobs.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Finish the RUNNING record of `name`. A `None` message leaves any
    /// existing error message untouched.
    pub fn mark_finished(
        &mut self,
        name: &str,
        result: ResultState,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(job) = self.running_mut(name) else {
            return false;
        };
        finish(job, result, message, now);
        self.dirty = true;
        true
    }

    pub fn append_log_line(&mut self, name: &str, line: &str, now: DateTime<Utc>) -> bool {
        self.touch_running(name, now, |job| job.log_lines.push(line.to_string()))
    }

    pub fn set_log_lines(&mut self, name: &str, lines: Vec<String>, now: DateTime<Utc>) -> bool {
        self.touch_running(name, now, |job| job.log_lines = lines)
    }

    pub fn add_additional_data(
        &mut self,
        name: &str,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.touch_running(name, now, |job| {
            job.additional_data
                .insert(key.to_string(), value.to_string());
        })
    }

    pub fn update_host_thread(
        &mut self,
        name: &str,
        host: &str,
        thread: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.touch_running(name, now, |job| {
            job.host = Some(host.to_string());
            job.thread = Some(thread.to_string());
        })
    }

    fn touch_running(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
        update: impl FnOnce(&mut JobInfo),
    ) -> bool {
        let Some(job) = self.running_mut(name) else {
            return false;
        };
        update(job);
        job.last_modified_at = now;
        self.dirty = true;
        true
    }

    /// Mark every RUNNING record past its deadline as TIMED_OUT. Returns the
    /// names of the records that were swept.
    pub fn cleanup_timed_out(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut swept = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| j.is_timed_out(now)) {
            finish(job, ResultState::TimedOut, None, now);
            swept.push(job.name.clone());
        }
        if !swept.is_empty() {
            self.dirty = true;
        }
        swept
    }

    pub fn clear(&mut self) {
        if !self.jobs.is_empty() {
            self.jobs.clear();
            self.dirty = true;
        }
    }

    pub fn count(&self) -> usize {
        self.jobs.len()
    }
}

fn finish(job: &mut JobInfo, result: ResultState, message: Option<&str>, now: DateTime<Utc>) {
    job.state = RunningState::Finished;
    job.result_state = Some(result);
    job.finished_at = Some(now);
    job.last_modified_at = now;
    if let Some(msg) = message {
        job.error_message = Some(msg.to_string());
    }
}
