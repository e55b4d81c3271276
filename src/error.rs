//! Error types for ephemeral job execution
//!
//! Every variant is terminal for the job that raised it. Nothing here is
//! retried by the engine; a queue in front of it may decide otherwise.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for job orchestration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Malformed client input, rejected before any workspace is allocated
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A chain failed its shape, permission or region checks before execution
    #[error("Validation error: {0}")]
    Validation(String),

    /// A tool exited non-zero mid-chain
    #[error("Step '{step_id}' (#{index}, {tool}) failed with exit status {exit_status}: {stderr}")]
    StepFailed {
        step_id: String,
        index: usize,
        tool: String,
        exit_status: i32,
        stderr: String,
    },

    /// The first-stage chain found no dataset sampled at the requested time
    #[error("No raster maps found for timestamp: {timestamp}")]
    NoDataForTimestamp { timestamp: String },

    /// The final tabular output could not be parsed
    #[error("Malformed output at line {line}: {reason}")]
    MalformedOutput { line: usize, reason: String },

    /// Workspace allocation failed
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The wall-clock budget for the job ran out
    #[error("Job timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Structural fault below the executor (tool missing, workspace gone)
    #[error("Execution environment error: {0}")]
    Environment(String),
}

/// Result type alias for job operations
pub type Result<T> = std::result::Result<T, JobError>;

/// Stable, serializable name of an error variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    ValidationError,
    StepFailed,
    NoDataForTimestamp,
    MalformedOutput,
    ResourceExhausted,
    Timeout,
    Environment,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::BadRequest(_) => ErrorKind::BadRequest,
            JobError::Validation(_) => ErrorKind::ValidationError,
            JobError::StepFailed { .. } => ErrorKind::StepFailed,
            JobError::NoDataForTimestamp { .. } => ErrorKind::NoDataForTimestamp,
            JobError::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            JobError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            JobError::Timeout { .. } => ErrorKind::Timeout,
            JobError::Environment(_) => ErrorKind::Environment,
        }
    }

    /// HTTP status code equivalent
    pub fn http_code(&self) -> u16 {
        match self {
            JobError::BadRequest(_)
            | JobError::Validation(_)
            | JobError::StepFailed { .. }
            | JobError::NoDataForTimestamp { .. } => 400,
            JobError::MalformedOutput { .. } | JobError::Environment(_) => 500,
            JobError::ResourceExhausted(_) => 503,
            JobError::Timeout { .. } => 504,
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Environment(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = JobError::NoDataForTimestamp {
            timestamp: "2001-03-16T12:30:15".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "No raster maps found for timestamp: 2001-03-16T12:30:15"
        );

        let step = JobError::StepFailed {
            step_id: "r_stats_7".to_string(),
            index: 2,
            tool: "r.stats".to_string(),
            exit_status: 1,
            stderr: "ERROR: Raster map not found".to_string(),
        };
        assert!(step.to_string().contains("r_stats_7"));
        assert!(step.to_string().contains("Raster map not found"));

        let timeout = JobError::Timeout { seconds: 30 };
        assert!(timeout.to_string().contains("30s"));
    }

    #[test]
    fn test_http_codes() {
        assert_eq!(JobError::BadRequest("x".into()).http_code(), 400);
        assert_eq!(JobError::Validation("x".into()).http_code(), 400);
        assert_eq!(
            JobError::MalformedOutput { line: 1, reason: "x".into() }.http_code(),
            500
        );
        assert_eq!(JobError::ResourceExhausted("x".into()).http_code(), 503);
        assert_eq!(JobError::Timeout { seconds: 1 }.http_code(), 504);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let kind = JobError::Validation("bad tool".into()).kind();
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"validation_error\"");
    }
}
