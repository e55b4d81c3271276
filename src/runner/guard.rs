use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::chain::ProcessChain;
use crate::workspace::Workspace;

/// Permission and region checks performed before a chain may run
pub trait ChainGuard: Send + Sync {
    fn check_permissions(
        &self,
        chain: &ProcessChain,
        workspace: &Workspace,
    ) -> std::result::Result<(), String>;

    fn check_region(
        &self,
        chain: &ProcessChain,
        workspace: &Workspace,
    ) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Tools a chain may use; everything when unset
    pub allowed_tools: Option<Vec<String>>,
    /// Largest region, in cells, a chain may run against
    pub cell_limit: Option<u64>,
}

/// Guard backed by a tool allow-list, the workspace's readable scopes and a
/// cell limit
#[derive(Debug, Clone, Default)]
pub struct ScopeGuard {
    allowed_tools: Option<HashSet<String>>,
    cell_limit: Option<u64>,
}

impl ScopeGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            allowed_tools: config
                .allowed_tools
                .map(|tools| tools.into_iter().collect()),
            cell_limit: config.cell_limit,
        }
    }
}

/// Scopes referenced by a parameter value (`name@scope`, comma separated)
fn referenced_scopes(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .filter_map(|item| item.rsplit_once('@').map(|(_, scope)| scope.trim()))
        .filter(|scope| !scope.is_empty())
}

impl ChainGuard for ScopeGuard {
    fn check_permissions(
        &self,
        chain: &ProcessChain,
        workspace: &Workspace,
    ) -> std::result::Result<(), String> {
        let readable: HashSet<&str> = workspace.readable_scopes().collect();

        for step in chain.steps() {
            if let Some(allowed) = &self.allowed_tools {
                if !allowed.contains(step.tool()) {
                    return Err(format!(
                        "Tool '{}' in step '{}' is not permitted",
                        step.tool(),
                        step.id()
                    ));
                }
            }

            for param in step.params() {
                for scope in referenced_scopes(&param.value) {
                    if !readable.contains(scope) {
                        return Err(format!(
                            "Step '{}' references scope '{}' which was not declared",
                            step.id(),
                            scope
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    fn check_region(
        &self,
        _chain: &ProcessChain,
        workspace: &Workspace,
    ) -> std::result::Result<(), String> {
        match (self.cell_limit, workspace.region()) {
            (Some(limit), Some(region)) if region.cells() > limit => Err(format!(
                "Region of {} cells exceeds the limit of {} cells",
                region.cells(),
                limit
            )),
            _ => Ok(()),
        }
    }
}
