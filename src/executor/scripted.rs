use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ToolExecutor, ToolOutput};
use crate::chain::Step;
use crate::error::{JobError, Result};
use crate::workspace::Workspace;

type Handler = Arc<dyn Fn(&Step) -> ToolOutput + Send + Sync>;

/// A recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub job_id: String,
    pub step_id: String,
    pub tool: String,
    pub args: Vec<String>,
}

/// In-memory tool executor with canned per-tool behaviour.
///
/// Tools without a handler succeed with empty output, unless the executor is
/// `echo`ing, in which case they print their own command line.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    handlers: HashMap<String, Handler>,
    missing: HashSet<String>,
    echo: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<ScriptedCall>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every unscripted tool prints its command line and succeeds
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn on<F>(mut self, tool: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Step) -> ToolOutput + Send + Sync + 'static,
    {
        self.handlers.insert(tool.into(), Arc::new(handler));
        self
    }

    pub fn on_stdout(self, tool: impl Into<String>, stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        self.on(tool, move |_| ToolOutput::success(stdout.clone()))
    }

    pub fn fail(self, tool: impl Into<String>, exit_status: i32, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        self.on(tool, move |_| ToolOutput::failure(exit_status, stderr.clone()))
    }

    /// Behave as if the tool were not installed
    pub fn missing(mut self, tool: impl Into<String>) -> Self {
        self.missing.insert(tool.into());
        self
    }

    /// Sleep before every invocation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn tools_called(&self) -> Vec<String> {
        self.calls.lock().await.iter().map(|c| c.tool.clone()).collect()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn run(&self, workspace: &Workspace, step: &Step) -> Result<ToolOutput> {
        if self.missing.contains(step.tool()) {
            return Err(JobError::Environment(format!("Tool '{}' not found", step.tool())));
        }

        self.calls.lock().await.push(ScriptedCall {
            job_id: workspace.job_id().to_string(),
            step_id: step.id().to_string(),
            tool: step.tool().to_string(),
            args: step.args(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let output = match self.handlers.get(step.tool()) {
            Some(handler) => handler(step),
            None if self.echo => {
                ToolOutput::success(format!("{} {}\n", step.tool(), step.args().join(" ")))
            }
            None => ToolOutput::success(""),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{WorkspaceConfig, WorkspaceManager};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scripted_outputs_and_calls() {
        let base = TempDir::new().unwrap();
        let mgr = WorkspaceManager::new(WorkspaceConfig {
            base_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        });
        let ws = mgr.allocate("job").unwrap();

        let tools = ScriptedExecutor::new()
            .on_stdout("t.sample", "polygon|precip_2001|2001-03-16")
            .missing("gdalinfo");

        let out = tools.run(&ws, &Step::new("s", "t.sample")).await.unwrap();
        assert_eq!(out.stdout, "polygon|precip_2001|2001-03-16");

        let out = tools.run(&ws, &Step::new("r", "g.region")).await.unwrap();
        assert_eq!(out, ToolOutput::success(""));

        assert!(tools.run(&ws, &Step::new("g", "gdalinfo")).await.is_err());
        assert_eq!(tools.tools_called().await, vec!["t.sample", "g.region"]);
    }

    #[tokio::test]
    async fn test_echo_mode() {
        let base = TempDir::new().unwrap();
        let mgr = WorkspaceManager::new(WorkspaceConfig {
            base_dir: Some(base.path().to_path_buf()),
            ..Default::default()
        });
        let ws = mgr.allocate("job").unwrap();

        let out = ScriptedExecutor::echo()
            .run(&ws, &Step::new("m", "r.mask").input("vector", "polygon"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "r.mask vector=polygon\n");
    }
}
