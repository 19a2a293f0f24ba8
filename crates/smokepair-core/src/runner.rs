//! Comparison orchestration.
//!
//! [`Runner::run`] provisions the worktree lane, runs the smoke battery in both
//! lanes (concurrently when live servers are involved) and writes the report.
//! Servers are always stopped before the worktree is removed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::{Mode, RunConfig};
use crate::error::RunError;
use crate::exec::{CommandExecutor, SystemExecutor};
use crate::lane::{Lane, LanePair};
use crate::obs;
use crate::report::ComparisonReport;
use crate::sandbox::{Sandbox, SandboxSettings};
use crate::server::{self, ServerProcess, READY_POLL_INTERVAL, READY_TIMEOUT, STOP_GRACE};
use crate::signals::SignalGuard;
use crate::smoke::{ProbeReport, SmokeExecutor, SmokeResult};
use crate::updater::DependencyUpdater;
use crate::worktree::Worktree;

/// Result of a completed comparison.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: ComparisonReport,
    pub output_root: PathBuf,
    pub probes: BTreeMap<Lane, ProbeReport>,
    /// Whether the after lane passed.
    pub success: bool,
}

impl RunOutcome {
    /// Process exit code. A completed comparison is `0` whatever the lanes
    /// reported; lane failures are data in the report.
    pub fn exit_code(&self) -> i32 {
        0
    }
}

#[derive(Debug)]
struct LaneResult {
    smoke: SmokeResult,
    probes: ProbeReport,
}

/// Orchestrates one comparison run. Cheap to clone; lane tasks each hold a
/// clone.
#[derive(Clone)]
pub struct Runner {
    config: Arc<RunConfig>,
    executor: Arc<dyn CommandExecutor>,
    output_root: PathBuf,
    ready_timeout: Duration,
    poll_interval: Duration,
    stop_grace: Duration,
}

impl Runner {
    pub fn new(config: Arc<RunConfig>) -> Self {
        let output_root = config.output_root();
        Self {
            config,
            executor: Arc::new(SystemExecutor),
            output_root,
            ready_timeout: READY_TIMEOUT,
            poll_interval: READY_POLL_INTERVAL,
            stop_grace: STOP_GRACE,
        }
    }

    /// Use a different backend for short-lived commands.
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Override server readiness timing.
    pub fn with_server_timing(mut self, ready_timeout: Duration, poll_interval: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Run the comparison end to end.
    pub async fn run(&self) -> Result<RunOutcome, RunError> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, self.config.identifier());
        self.run_inner(&run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: &str) -> Result<RunOutcome, RunError> {
        let start = Instant::now();
        let identifier = self.config.identifier();
        let (mode_name, worktree_name) = match self.config.mode {
            Mode::Dependency { .. } => ("dependency", "worktree"),
            Mode::Branch { .. } => ("branch", "before_worktree"),
        };
        obs::emit_run_started(run_id, identifier, mode_name, self.config.server);
        info!("== smokepair: {identifier} ==");

        self.prepare_output_root().await?;

        let worktree = Worktree::new(&self.output_root, worktree_name);
        let lanes = self.provision_and_run(&worktree).await;
        worktree
            .remove(self.executor.as_ref(), &self.config.project_root)
            .await;
        let (before, after) = lanes?;

        info!("5. Generating report...");
        let report = ComparisonReport::build(identifier, before.smoke, after.smoke, &self.output_root);
        report.write_all(&self.output_root)?;

        obs::emit_run_finished(
            run_id,
            report.classification.as_str(),
            start.elapsed().as_millis() as u64,
        );

        Ok(RunOutcome {
            success: report.after.success,
            report,
            output_root: self.output_root.clone(),
            probes: BTreeMap::from([(Lane::Before, before.probes), (Lane::After, after.probes)]),
        })
    }

    /// Stop servers left behind by an earlier run, then start from an empty
    /// output directory.
    async fn prepare_output_root(&self) -> Result<(), RunError> {
        if self.output_root.is_dir() {
            let stale = server::cleanup_stale(&self.output_root, self.stop_grace).await;
            if stale > 0 {
                info!(stale, "stopped servers left by a previous run");
            }
            tokio::fs::remove_dir_all(&self.output_root).await?;
        }
        tokio::fs::create_dir_all(&self.output_root).await?;
        Ok(())
    }

    async fn provision_and_run(&self, worktree: &Worktree) -> Result<(LaneResult, LaneResult), RunError> {
        let project_root = &self.config.project_root;
        let updater = DependencyUpdater::new(
            self.config.toolchain.clone(),
            project_root,
            &self.output_root,
            self.executor.clone(),
        );

        let lanes = match &self.config.mode {
            Mode::Dependency { name, version } => {
                info!("1. Creating worktree...");
                worktree
                    .create(self.executor.as_ref(), project_root, None)
                    .await?;

                let target = version
                    .as_deref()
                    .map(|v| format!(" to {v}"))
                    .unwrap_or_default();
                info!("2. Updating {name}{target}...");
                let outcome = updater
                    .update(worktree.path(), name, version.as_deref())
                    .await?;
                if !outcome.success {
                    return Err(RunError::UpdateFailed {
                        dependency: name.clone(),
                        log: outcome.log_path,
                    });
                }

                LanePair {
                    before: project_root.clone(),
                    after: worktree.path().to_path_buf(),
                }
            }
            Mode::Branch { before, .. } => {
                info!("1. Creating worktree for {before}...");
                worktree
                    .create(self.executor.as_ref(), project_root, Some(before.as_str()))
                    .await?;

                info!("2. Installing dependencies for {before}...");
                let outcome = updater.install(worktree.path()).await?;
                if !outcome.success {
                    return Err(RunError::InstallFailed {
                        log: outcome.log_path,
                    });
                }
                updater.write_lockfile_diff(worktree.path(), project_root)?;

                LanePair {
                    before: worktree.path().to_path_buf(),
                    after: project_root.clone(),
                }
            }
        };

        if self.config.server {
            self.run_with_servers(&lanes).await
        } else {
            self.run_without_servers(&lanes).await
        }
    }

    async fn run_without_servers(&self, lanes: &LanePair) -> Result<(LaneResult, LaneResult), RunError> {
        info!("3. Running smoke tests (before)...");
        let before = self
            .run_lane(Lane::Before, lanes.directory(Lane::Before), None)
            .await?;
        info!("4. Running smoke tests (after)...");
        let after = self
            .run_lane(Lane::After, lanes.directory(Lane::After), None)
            .await?;
        Ok((before, after))
    }

    async fn run_with_servers(&self, lanes: &LanePair) -> Result<(LaneResult, LaneResult), RunError> {
        let sandbox = self.setup_sandboxes(lanes).await?;
        let mut servers = self.build_servers(sandbox.as_ref());

        let guard = match SignalGuard::install() {
            Ok(guard) => guard,
            Err(e) => {
                self.shutdown(&mut servers, sandbox.as_ref(), lanes).await;
                return Err(RunError::Signals(e));
            }
        };

        let result = tokio::select! {
            result = self.server_phase(&mut servers, lanes) => result,
            signal = guard.wait() => {
                warn!(signal, "interrupted, shutting down servers");
                Err(RunError::Interrupted(signal))
            }
        };

        self.shutdown(&mut servers, sandbox.as_ref(), lanes).await;

        let interrupted = guard.pending();
        drop(guard);
        match (result, interrupted) {
            (Ok(_), Some(signal)) => Err(RunError::Interrupted(signal)),
            (result, _) => result,
        }
    }

    /// Start both servers, then run both lanes concurrently.
    async fn server_phase(
        &self,
        servers: &mut [ServerProcess; 2],
        lanes: &LanePair,
    ) -> Result<(LaneResult, LaneResult), RunError> {
        info!("   Starting servers...");
        let [before, after] = servers;
        tokio::try_join!(
            start_server(before, lanes.directory(Lane::Before), &self.config.environment),
            start_server(after, lanes.directory(Lane::After), &self.config.environment),
        )?;

        info!("3. Running smoke tests (before & after in parallel)...");
        let mut tasks = JoinSet::new();
        for lane in Lane::ALL {
            let runner = self.clone();
            let directory = lanes.directory(lane).to_path_buf();
            let port = self.config.port(lane);
            tasks.spawn(async move {
                let result = runner.run_lane(lane, &directory, Some(port)).await;
                (lane, result)
            });
        }

        let mut before = None;
        let mut after = None;
        while let Some(joined) = tasks.join_next().await {
            let (lane, result) = joined.map_err(|e| RunError::LaneAborted(e.to_string()))?;
            match lane {
                Lane::Before => before = Some(result?),
                Lane::After => after = Some(result?),
            }
        }

        match (before, after) {
            (Some(before), Some(after)) => Ok((before, after)),
            _ => Err(RunError::LaneAborted(
                "a lane finished without a result".to_string(),
            )),
        }
    }

    async fn run_lane(
        &self,
        lane: Lane,
        directory: &Path,
        server_port: Option<u16>,
    ) -> Result<LaneResult, RunError> {
        let output_dir = self.output_root.join(lane.as_str());
        let smoke = SmokeExecutor::new(
            self.config.identifier(),
            &self.config.project_root,
            self.config.toolchain.clone(),
            self.executor.clone(),
        );

        let result = match &self.config.test_command {
            Some(command) => smoke.run_command(command, directory, &output_dir).await?,
            None => smoke.run(directory, &output_dir, server_port).await?,
        };
        let probes = smoke
            .run_probes(
                &self.config.probes,
                &self.config.probes_path(),
                directory,
                &output_dir,
                server_port,
            )
            .await?;

        obs::emit_lane_finished(lane, result.success, result.elapsed);
        Ok(LaneResult {
            smoke: result,
            probes,
        })
    }

    fn build_servers(&self, sandbox: Option<&Sandbox>) -> [ServerProcess; 2] {
        let settings = SandboxSettings::from_config(&self.config);
        Lane::ALL.map(|lane| {
            let env = settings.lane_env(sandbox.map(|s| s.database(lane)));
            ServerProcess::new(
                lane,
                self.config.port(lane),
                self.output_root.join(lane.as_str()),
                env,
                self.config.toolchain.server_command.clone(),
            )
            .with_ready_timeout(self.ready_timeout)
            .with_poll_interval(self.poll_interval)
            .with_stop_grace(self.stop_grace)
        })
    }

    /// Create and seed one database per lane. `None` when sandboxing is off
    /// or no database URL base is known.
    async fn setup_sandboxes(&self, lanes: &LanePair) -> Result<Option<Sandbox>, RunError> {
        if !self.config.sandbox {
            return Ok(None);
        }
        let Some(base_url) = self.config.database_url_base.as_deref() else {
            warn!("sandbox enabled but no database URL base is configured or detectable; skipping");
            return Ok(None);
        };

        let sandbox = Sandbox::new(
            &self.config.toolchain.database_prefix,
            self.config.identifier(),
            base_url,
            SandboxSettings::from_config(&self.config),
            self.output_root.join("sandbox"),
            self.executor.clone(),
        );

        info!("   Setting up sandbox databases...");
        for lane in Lane::ALL {
            if let Err(e) = sandbox
                .setup(lanes.directory(lane), sandbox.database(lane))
                .await
            {
                self.cleanup_sandboxes(&sandbox, lanes).await;
                return Err(e.into());
            }
        }
        Ok(Some(sandbox))
    }

    async fn cleanup_sandboxes(&self, sandbox: &Sandbox, lanes: &LanePair) {
        info!("   Cleaning up sandbox databases...");
        for lane in Lane::ALL {
            if let Err(e) = sandbox
                .cleanup(lanes.directory(lane), sandbox.database(lane))
                .await
            {
                obs::emit_cleanup_failed("sandbox", &e);
            }
        }
    }

    /// Stop both servers, then drop the sandbox databases.
    async fn shutdown(&self, servers: &mut [ServerProcess; 2], sandbox: Option<&Sandbox>, lanes: &LanePair) {
        let [before, after] = servers;
        tokio::join!(before.stop(), after.stop());
        if let Some(sandbox) = sandbox {
            self.cleanup_sandboxes(sandbox, lanes).await;
        }
    }
}

async fn start_server(server: &mut ServerProcess, directory: &Path, environment: &str) -> Result<(), RunError> {
    let lane = server.lane();
    server
        .start(directory)
        .await
        .map_err(|source| RunError::ServerStart { lane, source })?;
    info!(
        "   {} server running on port {} ({environment})",
        capitalized(lane),
        server.port()
    );
    Ok(())
}

fn capitalized(lane: Lane) -> &'static str {
    match lane {
        Lane::Before => "Before",
        Lane::After => "After",
    }
}
