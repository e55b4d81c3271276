use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, JobKind, JobStatus};
use crate::error::{ErrorKind, JobError};
use crate::executor::ExecutionLogEntry;
use crate::extract::StatRecord;

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Success {
        http_code: u16,
        records: Vec<StatRecord>,
    },
    Failure {
        http_code: u16,
        error_kind: ErrorKind,
        message: String,
        process_log: Vec<ExecutionLogEntry>,
    },
}

impl JobOutcome {
    pub fn success(records: Vec<StatRecord>) -> Self {
        JobOutcome::Success {
            http_code: 200,
            records,
        }
    }

    pub fn from_error(error: &JobError, process_log: Vec<ExecutionLogEntry>) -> Self {
        JobOutcome::Failure {
            http_code: error.http_code(),
            error_kind: error.kind(),
            message: error.to_string(),
            process_log,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    pub fn http_code(&self) -> u16 {
        match self {
            JobOutcome::Success { http_code, .. } | JobOutcome::Failure { http_code, .. } => {
                *http_code
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accepted,
    Running,
    Finished,
    Error,
}

impl From<JobStatus> for ResponseStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => ResponseStatus::Accepted,
            JobStatus::Running => ResponseStatus::Running,
            JobStatus::Finished => ResponseStatus::Finished,
            JobStatus::Error => ResponseStatus::Error,
        }
    }
}

/// Document delivered to clients, for every status a job can be in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResponse {
    pub status: ResponseStatus,
    pub resource_id: String,
    pub kind: JobKind,
    pub http_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub process_results: Vec<StatRecord>,
    pub process_log: Vec<ExecutionLogEntry>,
    pub accept_timestamp: f64,
    pub accept_datetime: String,
    pub timestamp: f64,
    pub datetime: String,
    pub time_delta: f64,
}

fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ProcessingResponse {
    fn base(
        status: ResponseStatus,
        resource_id: String,
        kind: JobKind,
        accepted: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            resource_id,
            kind,
            http_code: 200,
            message: String::new(),
            error_kind: None,
            process_results: vec![],
            process_log: vec![],
            accept_timestamp: unix_seconds(accepted),
            accept_datetime: rfc3339(accepted),
            timestamp: unix_seconds(updated),
            datetime: rfc3339(updated),
            time_delta: (updated - accepted).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0,
        }
    }

    /// Snapshot of a job, whatever its status
    pub fn from_job(job: &Job) -> Self {
        let mut response = Self::base(
            job.status.into(),
            job.id.clone(),
            job.kind,
            job.accepted_at,
            job.updated_at(),
        );
        response.process_log = job.process_log.clone();

        match &job.result {
            Some(JobOutcome::Success { http_code, records }) => {
                response.http_code = *http_code;
                response.message = "Processing successfully finished".to_string();
                response.process_results = records.clone();
            }
            Some(JobOutcome::Failure {
                http_code,
                error_kind,
                message,
                process_log,
            }) => {
                response.http_code = *http_code;
                response.error_kind = Some(*error_kind);
                response.message = message.clone();
                response.process_log = process_log.clone();
            }
            None => {
                response.message = match job.status {
                    JobStatus::Running => "Processing is running".to_string(),
                    _ => "Resource accepted".to_string(),
                };
            }
        }

        response
    }

    /// Response for a request refused before a job existed
    pub fn rejected(kind: JobKind, error: &JobError) -> Self {
        let now = Utc::now();
        let mut response = Self::base(
            ResponseStatus::Error,
            format!("resource_id-{}", Uuid::new_v4()),
            kind,
            now,
            now,
        );
        response.http_code = error.http_code();
        response.error_kind = Some(error.kind());
        response.message = error.to_string();
        response
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ResponseStatus::Finished | ResponseStatus::Error)
    }
}
