//! Throwaway per-lane databases.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::SandboxError;
use crate::exec::{write_step_logs, CommandExecutor, CommandSpec};
use crate::lane::Lane;

/// A uniquely named database owned by one lane for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDatabase {
    pub lane: Lane,
    pub name: String,
    pub url: String,
}

/// The parts of the run configuration the sandbox needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSettings {
    pub environment: String,
    pub environment_variables: Vec<String>,
    pub task_runner: Vec<String>,
    pub script_runner: Vec<String>,
    pub setup_task: Option<String>,
    pub setup_script: Option<String>,
}

impl SandboxSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            environment: config.environment.clone(),
            environment_variables: config.toolchain.environment_variables.clone(),
            task_runner: config.toolchain.task_runner.clone(),
            script_runner: config.toolchain.script_runner.clone(),
            setup_task: config.setup_task.clone(),
            setup_script: config.setup_script.clone(),
        }
    }

    /// Environment-name variables (`RAILS_ENV`, `RACK_ENV`, ...) plus
    /// `DATABASE_URL` when a database is given.
    pub fn lane_env(&self, database: Option<&SandboxDatabase>) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .environment_variables
            .iter()
            .map(|name| (name.clone(), self.environment.clone()))
            .collect();
        if let Some(db) = database {
            env.insert("DATABASE_URL".to_string(), db.url.clone());
        }
        env
    }
}

/// `{prefix}_{identifier}_{lane}_{pid}` with the identifier reduced to
/// `[A-Za-z0-9_]`.
pub fn database_name(prefix: &str, identifier: &str, lane: Lane, pid: u32) -> String {
    let identifier: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{prefix}_{identifier}_{lane}_{pid}")
}

/// Creates, seeds and drops the lane databases.
pub struct Sandbox {
    before: SandboxDatabase,
    after: SandboxDatabase,
    settings: SandboxSettings,
    log_dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl Sandbox {
    pub fn new(
        prefix: &str,
        identifier: &str,
        base_url: &str,
        settings: SandboxSettings,
        log_dir: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let pid = std::process::id();
        let database = |lane| {
            let name = database_name(prefix, identifier, lane, pid);
            SandboxDatabase {
                lane,
                url: format!("{base_url}/{name}"),
                name,
            }
        };
        Self {
            before: database(Lane::Before),
            after: database(Lane::After),
            settings,
            log_dir: log_dir.into(),
            executor,
        }
    }

    pub fn database(&self, lane: Lane) -> &SandboxDatabase {
        match lane {
            Lane::Before => &self.before,
            Lane::After => &self.after,
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Create the database, load the schema and run the optional seed steps.
    /// Stops at the first failing step.
    pub async fn setup(&self, directory: &Path, database: &SandboxDatabase) -> Result<(), SandboxError> {
        info!(lane = %database.lane, database = %database.name, "setting up sandbox database");
        let env = self.settings.lane_env(Some(database));

        self.run_step("db_create", self.task(&["db:create"]), directory, &env)
            .await?;
        self.run_step("db_schema_load", self.task(&["db:schema:load"]), directory, &env)
            .await?;

        if let Some(task) = &self.settings.setup_task {
            self.run_step("setup_task", self.task(&[task.as_str()]), directory, &env)
                .await?;
        }
        if let Some(script) = &self.settings.setup_script {
            let mut argv = self.settings.script_runner.clone();
            argv.push(script.clone());
            self.run_step("setup_script", argv, directory, &env).await?;
        }
        Ok(())
    }

    /// Drop the database.
    pub async fn cleanup(&self, directory: &Path, database: &SandboxDatabase) -> Result<(), SandboxError> {
        info!(lane = %database.lane, database = %database.name, "dropping sandbox database");
        let mut env = self.settings.lane_env(Some(database));
        env.insert(
            "DISABLE_DATABASE_ENVIRONMENT_CHECK".to_string(),
            "1".to_string(),
        );
        self.run_step("db_drop", self.task(&["db:drop"]), directory, &env)
            .await
    }

    fn task(&self, args: &[&str]) -> Vec<String> {
        let mut argv = self.settings.task_runner.clone();
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    async fn run_step(
        &self,
        step: &'static str,
        argv: Vec<String>,
        directory: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<(), SandboxError> {
        let spec = CommandSpec::new(&argv, directory).envs(env);
        debug!(step, command = %spec.display(), "sandbox step");

        let output = self
            .executor
            .run(&spec)
            .await
            .map_err(|source| SandboxError::Spawn {
                step,
                command: spec.display(),
                source,
            })?;
        let log = write_step_logs(&self.log_dir, step, &output)?;

        if !output.success {
            return Err(SandboxError::StepFailed {
                step,
                command: spec.display(),
                code: output.status_label(),
                log,
            });
        }
        Ok(())
    }
}
