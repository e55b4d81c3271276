//! Step execution
//!
//! The [`StepExecutor`] runs one step inside a workspace through a
//! [`ToolExecutor`] and turns whatever happened into an
//! [`ExecutionLogEntry`]. A non-zero exit is data, not an error; only faults
//! in the environment itself (missing tool, released workspace) are raised.

mod process;
mod scripted;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::Step;
use crate::error::{JobError, Result};
use crate::workspace::Workspace;

pub use process::{ProcessConfig, ProcessToolExecutor};
pub use scripted::{ScriptedCall, ScriptedExecutor};

/// What a tool left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// External tool execution facility
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `step` inside `workspace`. Errors are environment faults only.
    async fn run(&self, workspace: &Workspace, step: &Step) -> Result<ToolOutput>;
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step_index: usize,
    pub id: String,
    pub tool: String,
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionLogEntry {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

#[derive(Clone)]
pub struct StepExecutor {
    tools: Arc<dyn ToolExecutor>,
}

impl StepExecutor {
    pub fn new(tools: Arc<dyn ToolExecutor>) -> Self {
        Self { tools }
    }

    pub async fn execute(
        &self,
        workspace: &Workspace,
        index: usize,
        step: &Step,
    ) -> Result<ExecutionLogEntry> {
        if workspace.is_released() {
            return Err(JobError::Environment(format!(
                "Workspace for {} has been released",
                workspace.job_id()
            )));
        }

        debug!("Executing step #{} {} ({})", index, step.id(), step.tool());
        let started = Instant::now();
        let output = self.tools.run(workspace, step).await?;

        if !output.stderr.is_empty() {
            warn!("{} stderr: {}", step.tool(), output.stderr.trim_end());
        }
        debug!(
            "Step {} exited with {} after {:?}",
            step.id(),
            output.exit_status,
            started.elapsed()
        );

        Ok(ExecutionLogEntry {
            step_index: index,
            id: step.id().to_string(),
            tool: step.tool().to_string(),
            exit_status: output.exit_status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
