//! smokepair core library
//!
//! Runs the same smoke battery against a "before" and an "after" copy of an
//! application and reports how the two differ. The after copy either carries
//! a dependency update (dependency mode) or is a different git ref (branch
//! mode).

pub mod config;
pub mod diff;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod lane;
pub mod obs;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod server;
pub mod signals;
pub mod smoke;
pub mod telemetry;
pub mod updater;
pub mod worktree;

pub use config::{
    detect_database_url_base, FileSettings, Mode, Overrides, ProbeSelection, RunConfig, Toolchain,
    CONFIG_FILE, PROBE_CATALOG,
};
pub use diff::unified_diff;
pub use error::{
    ConfigError, ProvisionError, RunError, SandboxError, ServerStartError, SmokeError, UpdateError,
};
pub use exec::{CommandExecutor, CommandOutput, CommandSpec, SystemExecutor};
pub use lane::{Lane, LanePair};
pub use report::{Classification, ComparisonReport, JsonReport};
pub use runner::{RunOutcome, Runner};
pub use sandbox::{Sandbox, SandboxDatabase, SandboxSettings};
pub use server::{cleanup_stale, ServerProcess, ServerState};
pub use signals::SignalGuard;
pub use smoke::{ProbeReport, SmokeExecutor, SmokeResult};
pub use telemetry::init_tracing;
pub use updater::{DependencyUpdater, UpdateOutcome};
pub use worktree::Worktree;
