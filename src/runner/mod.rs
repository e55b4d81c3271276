//! Chain validation and execution
//!
//! `validate` is cheap and side-effect free; `run` drives the step executor
//! strictly in declaration order and stops at the first non-zero exit.

mod guard;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ProcessChain, CHAIN_VERSION};
use crate::error::JobError;
use crate::executor::{ExecutionLogEntry, StepExecutor};
use crate::workspace::Workspace;

pub use guard::{ChainGuard, GuardConfig, ScopeGuard};

/// Which of the expensive checks to skip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    pub skip_permission_check: bool,
    /// Only for exploratory chains run before the extent is known
    pub skip_region_check: bool,
}

impl ValidationOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn skip_permissions(mut self) -> Self {
        self.skip_permission_check = true;
        self
    }

    pub fn skip_region(mut self) -> Self {
        self.skip_region_check = true;
        self
    }
}

/// A chain that passed validation for one particular workspace
#[derive(Debug, Clone)]
pub struct ValidatedChain {
    chain: ProcessChain,
    job_id: String,
    options: ValidationOptions,
}

impl ValidatedChain {
    pub fn chain(&self) -> &ProcessChain {
        &self.chain
    }

    pub fn options(&self) -> ValidationOptions {
        self.options
    }
}

/// Execution log of one chain, with lookup by exported output name
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainLog {
    entries: Vec<ExecutionLogEntry>,
    #[serde(skip)]
    outputs: HashMap<String, usize>,
}

impl ChainLog {
    fn push(&mut self, entry: ExecutionLogEntry, exports: Option<&str>) {
        if let Some(name) = exports {
            self.outputs.insert(name.to_string(), self.entries.len());
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ExecutionLogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ExecutionLogEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at a given position
    pub fn get(&self, index: usize) -> Option<&ExecutionLogEntry> {
        self.entries.get(index)
    }

    /// Entry of the step that exported `name`
    pub fn output(&self, name: &str) -> Option<&ExecutionLogEntry> {
        self.outputs.get(name).and_then(|&i| self.entries.get(i))
    }

    pub fn last(&self) -> Option<&ExecutionLogEntry> {
        self.entries.last()
    }
}

/// A chain that stopped early, with everything it logged up to that point
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ChainFailure {
    pub error: JobError,
    pub log: ChainLog,
}

/// Receives each log entry as soon as its step finishes
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_entry(&self, entry: &ExecutionLogEntry);
}

struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {
    async fn on_entry(&self, _entry: &ExecutionLogEntry) {}
}

#[derive(Clone)]
pub struct ChainRunner {
    executor: StepExecutor,
    guard: Arc<dyn ChainGuard>,
}

impl ChainRunner {
    pub fn new(executor: StepExecutor, guard: Arc<dyn ChainGuard>) -> Self {
        Self { executor, guard }
    }

    pub fn validate(
        &self,
        chain: ProcessChain,
        workspace: &Workspace,
        options: ValidationOptions,
    ) -> Result<ValidatedChain, JobError> {
        check_shape(&chain).map_err(JobError::Validation)?;

        if !options.skip_permission_check {
            self.guard
                .check_permissions(&chain, workspace)
                .map_err(JobError::Validation)?;
        }

        if options.skip_region_check {
            tracing::debug!("Region check skipped for job {}", workspace.job_id());
        } else {
            self.guard
                .check_region(&chain, workspace)
                .map_err(JobError::Validation)?;
        }

        Ok(ValidatedChain {
            chain,
            job_id: workspace.job_id().to_string(),
            options,
        })
    }

    pub async fn run(
        &self,
        validated: &ValidatedChain,
        workspace: &Workspace,
    ) -> Result<ChainLog, ChainFailure> {
        self.run_observed(validated, workspace, &NoopObserver).await
    }

    pub async fn run_observed(
        &self,
        validated: &ValidatedChain,
        workspace: &Workspace,
        observer: &dyn StepObserver,
    ) -> Result<ChainLog, ChainFailure> {
        let mut log = ChainLog::default();

        if validated.job_id != workspace.job_id() {
            return Err(ChainFailure {
                error: JobError::Environment(format!(
                    "Chain was validated for job {} but run in workspace of {}",
                    validated.job_id,
                    workspace.job_id()
                )),
                log,
            });
        }

        for (index, step) in validated.chain.steps().iter().enumerate() {
            let entry = match self.executor.execute(workspace, index, step).await {
                Ok(entry) => entry,
                Err(error) => return Err(ChainFailure { error, log }),
            };
            observer.on_entry(&entry).await;

            let failed = !entry.succeeded();
            let exit_status = entry.exit_status;
            let stderr = entry.stderr.clone();
            log.push(entry, step.exported_as());

            if failed {
                warn!(
                    "Step {} ({}) of job {} failed with exit status {}",
                    step.id(),
                    step.tool(),
                    workspace.job_id(),
                    exit_status
                );
                return Err(ChainFailure {
                    error: JobError::StepFailed {
                        step_id: step.id().to_string(),
                        index,
                        tool: step.tool().to_string(),
                        exit_status,
                        stderr,
                    },
                    log,
                });
            }
        }

        info!(
            "Process chain of {} steps finished for job {}",
            log.len(),
            workspace.job_id()
        );
        Ok(log)
    }
}

fn is_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Structural checks that need no workspace state
fn check_shape(chain: &ProcessChain) -> std::result::Result<(), String> {
    if chain.version != CHAIN_VERSION {
        return Err(format!("Unsupported process chain version '{}'", chain.version));
    }
    if chain.is_empty() {
        return Err("Process chain contains no steps".to_string());
    }

    let mut ids = HashSet::new();
    let mut exports = HashSet::new();

    for step in chain.steps() {
        if step.id().is_empty() {
            return Err(format!("Step using '{}' has an empty id", step.tool()));
        }
        if !ids.insert(step.id()) {
            return Err(format!("Duplicate step id '{}'", step.id()));
        }
        if !is_tool_name(step.tool()) {
            return Err(format!("Invalid tool name '{}' in step '{}'", step.tool(), step.id()));
        }
        if !step.flag_letters().chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!(
                "Invalid flags '{}' in step '{}'",
                step.flag_letters(),
                step.id()
            ));
        }
        for param in step.params() {
            if !is_param_name(&param.param) {
                return Err(format!(
                    "Invalid parameter name '{}' in step '{}'",
                    param.param,
                    step.id()
                ));
            }
            if param.value.contains('\0') {
                return Err(format!(
                    "Parameter '{}' in step '{}' contains a NUL byte",
                    param.param,
                    step.id()
                ));
            }
        }
        if let Some(name) = step.exported_as() {
            if !exports.insert(name) {
                return Err(format!("Output '{}' is exported twice", name));
            }
        }
    }

    Ok(())
}
