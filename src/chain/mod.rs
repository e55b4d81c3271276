//! Process chain model
//!
//! A process chain is a declarative, ordered list of external tool
//! invocations. This module only builds and (de)serializes chains; checking
//! them against a live workspace is the runner's job.

mod step;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub use step::{Param, Step, Verbosity};

/// Schema version understood by the runner
pub const CHAIN_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessChain {
    pub version: String,
    #[serde(rename = "list", default)]
    steps: Vec<Step>,
}

impl ProcessChain {
    pub fn new() -> Self {
        Self {
            version: CHAIN_VERSION.to_string(),
            steps: vec![],
        }
    }

    /// Append a step
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse process chain JSON")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize process chain")
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse process chain YAML")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize process chain")
    }

    /// Load a chain from disk; `.yaml`/`.yml` are YAML, everything else JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read process chain {:?}", path))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") | None => Self::from_json(&content),
            Some(other) => Err(anyhow!("Unsupported process chain format: .{}", other)),
        }
    }
}

impl Default for ProcessChain {
    fn default() -> Self {
        Self::new()
    }
}
