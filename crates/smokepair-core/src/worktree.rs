//! Git worktree provisioning for the isolated lane.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::exec::{CommandExecutor, CommandSpec};

/// A detached git worktree at a deterministic path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    path: PathBuf,
}

impl Worktree {
    /// Worktree located at `base_dir/name`.
    pub fn new(base_dir: &Path, name: &str) -> Self {
        Self {
            path: base_dir.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check out `reference` (or `HEAD`) into the worktree path.
    pub async fn create(
        &self,
        executor: &dyn CommandExecutor,
        repo_root: &Path,
        reference: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let reference = reference.unwrap_or("HEAD");
        let path = self.path.display().to_string();
        let argv: Vec<String> = ["git", "worktree", "add", "--detach", "--force", path.as_str(), reference]
            .iter()
            .map(|s| s.to_string())
            .collect();

        debug!(reference, path = %path, "creating worktree");
        let output = executor
            .run(&CommandSpec::new(&argv, repo_root))
            .await
            .map_err(ProvisionError::Spawn)?;

        if !output.success {
            return Err(ProvisionError::Checkout {
                reference: reference.to_string(),
                path,
                output: format!("{}{}", output.stdout, output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Remove the worktree. Failures are logged, never returned.
    pub async fn remove(&self, executor: &dyn CommandExecutor, repo_root: &Path) {
        let path = self.path.display().to_string();
        let argv: Vec<String> = ["git", "worktree", "remove", "--force", path.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match executor.run(&CommandSpec::new(&argv, repo_root)).await {
            Ok(output) if output.success => debug!(path = %path, "removed worktree"),
            Ok(output) => warn!(
                path = %path,
                stderr = %output.stderr.trim(),
                "git worktree remove failed"
            ),
            Err(e) => warn!(path = %path, error = %e, "failed to run git worktree remove"),
        }
    }
}

/// Name of the branch checked out in `repo_dir`.
pub fn current_branch(repo_dir: &Path) -> Result<String, ProvisionError> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .map_err(ProvisionError::Spawn)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProvisionError::Git(format!(
            "git rev-parse --abbrev-ref HEAD failed: {}",
            stderr.trim()
        )));
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() {
        return Err(ProvisionError::Git(
            "git rev-parse --abbrev-ref HEAD returned empty output".to_string(),
        ));
    }
    Ok(branch)
}
