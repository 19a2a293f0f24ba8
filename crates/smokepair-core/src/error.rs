//! Error taxonomy for smokepair.
//!
//! Each component has its own error enum; [`RunError`] aggregates them for the
//! runner and decides the process exit code.

use std::path::PathBuf;
use std::time::Duration;

use crate::lane::Lane;

/// Errors produced while loading or validating the run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {}\nCreate one at the project root.", .0.display())]
    NotFound(PathBuf),

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("dependency is required in .smokepair.yml")]
    MissingDependency,

    #[error("cannot set both dependency and branch fields (before_branch/after_branch)")]
    ConflictingModes,

    #[error("before_port and after_port must differ (both are {0})")]
    SamePort(u16),

    #[error("failed to detect current git branch: {0}")]
    CurrentBranch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while provisioning a worktree.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to create git worktree at {path} for ref '{reference}': {output}")]
    Checkout {
        reference: String,
        path: String,
        output: String,
    },

    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git error: {0}")]
    Git(String),
}

/// Errors produced by the dependency updater.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("failed to rewrite manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the sandbox database provisioner.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox step {step} failed: {command} (exit {code}). Check {}", .log.display())]
    StepFailed {
        step: &'static str,
        command: String,
        code: String,
        log: PathBuf,
    },

    #[error("sandbox step {step} could not run `{command}`: {source}")]
    Spawn {
        step: &'static str,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while bringing a server to readiness.
#[derive(Debug, thiserror::Error)]
pub enum ServerStartError {
    #[error("server failed to start on port {port} within {timeout:?}")]
    Timeout { port: u16, timeout: Duration },

    #[error("server on port {port} exited before accepting connections ({status}). Check {}", .log.display())]
    Exited {
        port: u16,
        status: String,
        log: PathBuf,
    },

    #[error("failed to spawn `{command}` for port {port}: {source}")]
    Spawn {
        port: u16,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server command is empty")]
    EmptyCommand,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the smoke executor itself (never by a failing script).
#[derive(Debug, thiserror::Error)]
pub enum SmokeError {
    #[error("failed to write runtime config: {0}")]
    RuntimeConfig(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Orchestration-level failures. Anything here aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("dependency update for {dependency} failed. Check {}", .log.display())]
    UpdateFailed { dependency: String, log: PathBuf },

    #[error("dependency install failed. Check {}", .log.display())]
    InstallFailed { log: PathBuf },

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("{lane} server: {source}")]
    ServerStart {
        lane: Lane,
        #[source]
        source: ServerStartError,
    },

    #[error(transparent)]
    Smoke(#[from] SmokeError),

    #[error("lane task did not complete: {0}")]
    LaneAborted(String),

    #[error("interrupted by signal {0}")]
    Interrupted(i32),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Interrupted(signal) => 128 + signal,
            _ => 2,
        }
    }
}
