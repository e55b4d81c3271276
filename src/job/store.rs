use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use super::{Job, JobStatus};
use crate::executor::ExecutionLogEntry;

struct Entry {
    job: Job,
    status: watch::Sender<JobStatus>,
}

/// In-memory jobs keyed by id; each job has a status channel for waiters
///
/// Terminal jobs stay pollable for the retention period and are evicted on
/// the next insert or [`JobStore::sweep`] after that.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, Entry>>>,
    retention: Option<Duration>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep terminal jobs for `retention`; forever when `None`
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    pub async fn insert(&self, job: Job) {
        let (status, _) = watch::channel(job.status);
        let mut jobs = self.jobs.write().await;
        self.evict_expired(&mut jobs);
        jobs.insert(job.id.clone(), Entry { job, status });
    }

    /// Drop terminal jobs older than the retention period. Returns how many
    /// were dropped.
    pub async fn sweep(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        self.evict_expired(&mut jobs)
    }

    fn evict_expired(&self, jobs: &mut HashMap<String, Entry>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };

        let now = Utc::now();
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.job.finished_at {
            Some(finished) if entry.job.is_done() => now - finished < retention,
            _ => true,
        });

        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("Evicted {} expired jobs", evicted);
        }
        evicted
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).map(|e| e.job.clone())
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Receiver that sees every status change of the job
    pub async fn subscribe(&self, id: &str) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.read().await.get(id).map(|e| e.status.subscribe())
    }

    /// Apply `f` to a job that is not terminal yet. Returns false when the
    /// job is unknown or already terminal.
    pub async fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(id) else {
            warn!("Update for unknown job {}", id);
            return false;
        };
        if entry.job.is_done() {
            warn!("Job {} is already {:?}, update ignored", id, entry.job.status);
            return false;
        }

        f(&mut entry.job);
        entry.status.send_replace(entry.job.status);
        true
    }

    /// Move a pending job to running and return it. `None` when the job is
    /// unknown or was already started.
    pub async fn start(&self, id: &str) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(id)?;
        if entry.job.status != JobStatus::Pending {
            warn!("Job {} is {:?}, not pending", id, entry.job.status);
            return None;
        }

        entry.job.start();
        entry.status.send_replace(entry.job.status);
        Some(entry.job.clone())
    }

    pub async fn append_log(&self, id: &str, log_entry: ExecutionLogEntry) -> bool {
        self.update(id, |job| job.process_log.push(log_entry)).await
    }
}
