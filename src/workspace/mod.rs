//! Per-job isolated workspaces
//!
//! A workspace is a private temporary directory plus a private namespace for
//! intermediate named resources. Concurrent jobs never share one. Release is
//! idempotent and also happens on drop, so a job that errors, times out or
//! panics still gives its directory and quota slot back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{JobError, Result};

/// Computational region of a workspace, in cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub rows: u64,
    pub cols: u64,
}

impl Region {
    pub fn new(rows: u64, cols: u64) -> Self {
        Self { rows, cols }
    }

    pub fn cells(&self) -> u64 {
        self.rows.saturating_mul(self.cols)
    }

    /// Read `rows=` and `cols=` from shell-style `key=value` lines, as
    /// printed by `g.region -g`
    pub fn from_shell_output(text: &str) -> Option<Self> {
        let mut rows = None;
        let mut cols = None;
        for line in text.lines() {
            match line.trim().split_once('=') {
                Some(("rows", value)) => rows = value.trim().parse().ok(),
                Some(("cols", value)) => cols = value.trim().parse().ok(),
                _ => {}
            }
        }
        Some(Self::new(rows?, cols?))
    }
}

/// Decides whether a job may read a pre-existing scope
pub trait ScopeAccess: Send + Sync {
    fn can_read(&self, job_id: &str, scope: &str) -> bool;
}

/// Grants read access to every scope
#[derive(Debug, Clone, Default)]
pub struct AllowAllScopes;

impl ScopeAccess for AllowAllScopes {
    fn can_read(&self, _job_id: &str, _scope: &str) -> bool {
        true
    }
}

/// Grants read access to a fixed set of scopes
#[derive(Debug, Clone, Default)]
pub struct ScopeAllowList {
    scopes: HashSet<String>,
}

impl ScopeAllowList {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

impl ScopeAccess for ScopeAllowList {
    fn can_read(&self, _job_id: &str, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory for workspaces; the system temp dir when unset
    pub base_dir: Option<PathBuf>,
    /// Maximum number of workspaces alive at the same time
    pub max_live: usize,
    /// Region every new workspace starts with, if known
    pub default_region: Option<Region>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            max_live: 64,
            default_region: None,
        }
    }
}

/// Holds one unit of the live-workspace quota until dropped
struct QuotaSlot {
    live: Arc<AtomicUsize>,
}

impl Drop for QuotaSlot {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Isolated execution context owned by exactly one job
pub struct Workspace {
    job_id: String,
    namespace: String,
    root: Option<TempDir>,
    root_path: PathBuf,
    required_scopes: Vec<String>,
    region: Option<Region>,
    slot: Option<QuotaSlot>,
}

impl Workspace {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Name of the private namespace for intermediate resources
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Private temporary-file directory
    pub fn temp_dir(&self) -> PathBuf {
        self.root_path.join("tmp")
    }

    /// Directory backing the private namespace
    pub fn namespace_dir(&self) -> PathBuf {
        self.root_path.join("namespaces").join(&self.namespace)
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn set_region(&mut self, region: Region) {
        self.region = Some(region);
    }

    pub fn is_released(&self) -> bool {
        self.root.is_none()
    }

    /// Scopes a chain may reference: the declared ones plus the namespace
    pub fn readable_scopes(&self) -> impl Iterator<Item = &str> {
        self.required_scopes
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.namespace.as_str()))
    }

    /// Write a file into the temp directory and return its path
    pub fn write_temp_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        if self.is_released() {
            return Err(JobError::Environment(format!(
                "Workspace for {} has been released",
                self.job_id
            )));
        }

        let path = self.temp_dir().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Remove temp files and namespace. Safe to call any number of times.
    pub fn release(&mut self) {
        let Some(dir) = self.root.take() else {
            return;
        };

        if let Err(e) = dir.close() {
            warn!("Failed to remove workspace {:?}: {}", self.root_path, e);
        } else {
            debug!("Removed workspace {:?}", self.root_path);
        }

        self.slot.take();
        info!("Released workspace for job {}", self.job_id);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("job_id", &self.job_id)
            .field("namespace", &self.namespace)
            .field("root", &self.root_path)
            .field("required_scopes", &self.required_scopes)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Allocates and tears down workspaces
pub struct WorkspaceManager {
    config: WorkspaceConfig,
    access: Arc<dyn ScopeAccess>,
    live: Arc<AtomicUsize>,
    allocations: AtomicU64,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self::with_access(config, Arc::new(AllowAllScopes))
    }

    pub fn with_access(config: WorkspaceConfig, access: Arc<dyn ScopeAccess>) -> Self {
        Self {
            config,
            access,
            live: Arc::new(AtomicUsize::new(0)),
            allocations: AtomicU64::new(0),
        }
    }

    /// Number of `allocate` calls so far, successful or not
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Number of workspaces currently alive
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn allocate(&self, job_id: &str) -> Result<Workspace> {
        self.allocations.fetch_add(1, Ordering::SeqCst);

        let max_live = self.config.max_live;
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_live).then_some(n + 1)
            })
            .map_err(|_| {
                JobError::ResourceExhausted(format!(
                    "All {} workspaces are in use",
                    max_live
                ))
            })?;
        let slot = QuotaSlot {
            live: self.live.clone(),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("geochain-");
        let dir = match &self.config.base_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| JobError::ResourceExhausted(format!("Cannot create workspace: {}", e)))?;

        let namespace = namespace_for(job_id);
        let root_path = dir.path().to_path_buf();
        for sub in [root_path.join("tmp"), root_path.join("namespaces").join(&namespace)] {
            std::fs::create_dir_all(&sub).map_err(|e| {
                JobError::ResourceExhausted(format!("Cannot create {:?}: {}", sub, e))
            })?;
        }

        info!("Allocated workspace {:?} for job {}", root_path, job_id);

        Ok(Workspace {
            job_id: job_id.to_string(),
            namespace,
            root: Some(dir),
            root_path,
            required_scopes: vec![],
            region: self.config.default_region,
            slot: Some(slot),
        })
    }

    pub fn release(&self, workspace: &mut Workspace) {
        workspace.release();
    }

    /// Record read-only access to a pre-existing scope, after the access check
    pub fn declare_required_scope(&self, workspace: &mut Workspace, scope: &str) -> Result<()> {
        if !self.access.can_read(workspace.job_id(), scope) {
            return Err(JobError::Validation(format!(
                "Job {} has no read access to scope '{}'",
                workspace.job_id(),
                scope
            )));
        }

        if !workspace.required_scopes.iter().any(|s| s == scope) {
            workspace.required_scopes.push(scope.to_string());
        }
        Ok(())
    }
}

fn namespace_for(job_id: &str) -> String {
    let cleaned: String = job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("ephemeral_{}", cleaned)
}
