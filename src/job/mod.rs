//! Ephemeral statistics jobs
//!
//! A job moves `pending -> running -> finished | error` and never leaves a
//! terminal state. Only the [`JobController`] mutates jobs.

mod controller;
mod kind;
mod outcome;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::ExecutionLogEntry;

pub use controller::JobController;
pub use kind::{
    discover_raster, import_and_sample, CategoricalStats, JobKind, StatsKind, UnivariateStats,
    REGION, SAMPLED_MAPS, STATISTICS,
};
pub use outcome::{JobOutcome, ProcessingResponse, ResponseStatus};
pub use store::JobStore;

/// Exact format the request timestamp must have
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Finished,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }
}

/// What the client asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub project: String,
    /// Scope holding the dataset; read only for the job
    pub dataset_group: String,
    pub dataset: String,
    /// `YYYY-MM-DDTHH:MM:SS`
    pub timestamp: String,
    /// GeoJSON text of the polygon
    pub geometry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub request: JobRequest,
    pub status: JobStatus,
    pub result: Option<JobOutcome>,
    /// Entries of every chain run so far, in execution order
    #[serde(default)]
    pub process_log: Vec<ExecutionLogEntry>,
    pub accepted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, request: JobRequest) -> Self {
        Self {
            id: format!("resource_id-{}", Uuid::new_v4()),
            kind,
            request,
            status: JobStatus::Pending,
            result: None,
            process_log: vec![],
            accepted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, outcome: JobOutcome) {
        self.status = if outcome.is_success() {
            JobStatus::Finished
        } else {
            JobStatus::Error
        };
        self.result = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    /// Time of the most recent transition
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.finished_at
            .or(self.started_at)
            .unwrap_or(self.accepted_at)
    }
}
