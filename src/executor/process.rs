use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{ToolExecutor, ToolOutput};
use crate::chain::Step;
use crate::error::{JobError, Result};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Command prefix placed before every tool, e.g. `["grass", "{namespace}", "--exec"]`.
    /// `{namespace}` and `{tmp}` expand to the workspace's directories.
    pub launcher: Vec<String>,
    /// Directory holding the tool executables; `PATH` lookup when unset
    pub tool_dir: Option<PathBuf>,
    /// Extra environment for every tool
    pub env: BTreeMap<String, String>,
}

/// Runs each step as an operating system process
#[derive(Debug, Clone, Default)]
pub struct ProcessToolExecutor {
    config: ProcessConfig,
}

impl ProcessToolExecutor {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    fn program(&self, tool: &str) -> PathBuf {
        match &self.config.tool_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    fn expand(&self, template: &str, workspace: &Workspace) -> String {
        template
            .replace("{namespace}", &workspace.namespace_dir().to_string_lossy())
            .replace("{tmp}", &workspace.temp_dir().to_string_lossy())
    }

    /// Build the command for a step without spawning it
    pub fn command(&self, workspace: &Workspace, step: &Step) -> Command {
        let program = self.program(step.tool());

        let mut cmd = match self.config.launcher.split_first() {
            Some((launcher, rest)) => {
                let mut cmd = Command::new(self.expand(launcher, workspace));
                for arg in rest {
                    cmd.arg(self.expand(arg, workspace));
                }
                cmd.arg(&program);
                cmd
            }
            None => Command::new(&program),
        };

        cmd.args(step.args());
        cmd.current_dir(workspace.temp_dir());
        cmd.env("TMPDIR", workspace.temp_dir());
        cmd.env("GEOCHAIN_NAMESPACE", workspace.namespace());
        cmd.env("GEOCHAIN_NAMESPACE_DIR", workspace.namespace_dir());
        cmd.envs(&self.config.env);

        // Close stdin so interactive tools cannot block
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // A timed-out job drops this future; take the child down with it
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ToolExecutor for ProcessToolExecutor {
    async fn run(&self, workspace: &Workspace, step: &Step) -> Result<ToolOutput> {
        let mut cmd = self.command(workspace, step);
        tracing::debug!("Running tool: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                JobError::Environment(format!("Tool '{}' not found", step.tool()))
            }
            _ => JobError::Environment(format!("Failed to execute {}: {}", step.tool(), e)),
        })?;

        Ok(ToolOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
