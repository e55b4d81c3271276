//! Runtime configuration
//!
//! Layered: built-in defaults, then an optional YAML file, then `GEOCHAIN_*`
//! environment variables. The binary applies its command line flags last.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchConfig, JobService};
use crate::executor::{ProcessConfig, StepExecutor, ToolExecutor};
use crate::job::{JobController, JobStore};
use crate::runner::{ChainRunner, GuardConfig, ScopeGuard};
use crate::workspace::{WorkspaceConfig, WorkspaceManager};

pub const ENV_PREFIX: &str = "GEOCHAIN_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub process: ProcessConfig,
    pub guard: GuardConfig,
    pub dispatch: DispatchConfig,
    /// Wall-clock budget per job in seconds; unlimited when unset
    pub job_timeout_secs: Option<u64>,
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid configuration")
    }

    /// Defaults, overlaid with `path` if given, overlaid with the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {:?}", path))?;
                Self::from_yaml(&content)
                    .with_context(|| format!("Failed to parse config {:?}", path))?
            }
            None => Self::default(),
        };
        config.apply_vars(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `GEOCHAIN_*` variables looked up through `var`
    pub fn apply_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| var(&format!("{}{}", ENV_PREFIX, name));

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port.parse().context("GEOCHAIN_PORT must be a port number")?;
        }
        if let Some(dir) = get("WORKSPACE_DIR") {
            self.workspace.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(max) = get("MAX_WORKSPACES") {
            self.workspace.max_live = max
                .parse()
                .context("GEOCHAIN_MAX_WORKSPACES must be a number")?;
        }
        if let Some(dir) = get("TOOL_DIR") {
            self.process.tool_dir = Some(PathBuf::from(dir));
        }
        if let Some(launcher) = get("LAUNCHER") {
            self.process.launcher = launcher.split_whitespace().map(String::from).collect();
        }
        if let Some(workers) = get("WORKERS") {
            self.dispatch.workers = workers.parse().context("GEOCHAIN_WORKERS must be a number")?;
        }
        if let Some(secs) = get("JOB_TIMEOUT") {
            self.job_timeout_secs =
                Some(secs.parse().context("GEOCHAIN_JOB_TIMEOUT must be seconds")?);
        }
        if let Some(secs) = get("WAIT_TIMEOUT") {
            self.dispatch.wait_timeout_secs =
                secs.parse().context("GEOCHAIN_WAIT_TIMEOUT must be seconds")?;
        }
        if let Some(secs) = get("RETENTION") {
            self.dispatch.retention_secs =
                secs.parse().context("GEOCHAIN_RETENTION must be seconds")?;
        }

        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    /// Wire workspaces, runner, controller and queue around `tools`
    pub fn job_service(&self, tools: Arc<dyn ToolExecutor>) -> JobService {
        let workspaces = Arc::new(WorkspaceManager::new(self.workspace.clone()));
        let runner = ChainRunner::new(
            StepExecutor::new(tools),
            Arc::new(ScopeGuard::new(self.guard.clone())),
        );
        let store = JobStore::new().with_retention(Some(self.dispatch.retention()));
        let controller =
            JobController::new(workspaces, runner, store).with_budget(self.job_timeout());

        JobService::local(controller, self.dispatch.clone())
    }
}
