//! Smoke battery execution for one lane.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ProbeSelection, Toolchain, PROBE_CATALOG};
use crate::error::SmokeError;
use crate::exec::{CommandExecutor, CommandSpec};

pub const RUNTIME_CONFIG: &str = "smoke_config.yml";
pub const SMOKE_DIR: &str = "smoke";

/// Captured outcome of one lane's smoke run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokeResult {
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds.
    pub elapsed: f64,
    pub success: bool,
}

/// Contents of `smoke_config.yml`, handed to every script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub identifier: String,
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
}

/// Probes that ran, and the subset that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub ran: Vec<String>,
    pub failed: Vec<String>,
}

/// Discovers and runs smoke scripts, external test commands and probes.
#[derive(Clone)]
pub struct SmokeExecutor {
    identifier: String,
    test_root: PathBuf,
    toolchain: Toolchain,
    executor: Arc<dyn CommandExecutor>,
}

impl SmokeExecutor {
    /// Scripts are always discovered under `test_root` so both lanes run the
    /// same battery.
    pub fn new(
        identifier: impl Into<String>,
        test_root: impl Into<PathBuf>,
        toolchain: Toolchain,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            test_root: test_root.into(),
            toolchain,
            executor,
        }
    }

    /// Smoke scripts under `<test_root>/<smoke_dir>`, recursively, sorted.
    pub fn test_files(&self) -> Vec<PathBuf> {
        let extension = self.toolchain.script_extension.as_str();
        let mut files: Vec<PathBuf> = WalkDir::new(self.test_root.join(&self.toolchain.smoke_dir))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == extension))
            .collect();
        files.sort();
        files
    }

    /// Run every smoke script in `directory`, writing logs and timing to
    /// `output_dir`.
    pub async fn run(
        &self,
        directory: &Path,
        output_dir: &Path,
        server_port: Option<u16>,
    ) -> Result<SmokeResult, SmokeError> {
        let files = self.test_files();
        if files.is_empty() {
            let message = format!(
                "No smoke tests found (expected {}/**/*.{})",
                self.toolchain.smoke_dir.display(),
                self.toolchain.script_extension
            );
            warn!(directory = %directory.display(), "{message}");
            return Ok(SmokeResult {
                stdout: String::new(),
                stderr: message,
                elapsed: 0.0,
                success: false,
            });
        }

        let config_path = self.write_runtime_config(output_dir, server_port)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut success = true;
        let start = Instant::now();

        for file in &files {
            let spec = self.script_spec(file, &config_path, directory);
            debug!(script = %file.display(), "running smoke script");
            let output = self.executor.run(&spec).await?;
            stdout.push_str(&output.stdout);
            stderr.push_str(&output.stderr);
            success &= output.success;
        }

        let result = SmokeResult {
            stdout,
            stderr,
            elapsed: start.elapsed().as_secs_f64(),
            success,
        };
        write_artifacts(output_dir, &result)?;
        info!(
            scripts = files.len(),
            success = result.success,
            elapsed = result.elapsed,
            "smoke run finished"
        );
        Ok(result)
    }

    /// Run a single shell command instead of the script battery.
    pub async fn run_command(
        &self,
        command: &str,
        directory: &Path,
        output_dir: &Path,
    ) -> Result<SmokeResult, SmokeError> {
        let start = Instant::now();
        let output = self
            .executor
            .run(&CommandSpec::shell(command, directory))
            .await?;

        let result = SmokeResult {
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed: start.elapsed().as_secs_f64(),
            success: output.success,
        };
        write_artifacts(output_dir, &result)?;
        Ok(result)
    }

    /// Resolve the selected probes that exist in `probes_dir`, in catalog
    /// order for `All` and list order for `Named`.
    pub fn probe_scripts(&self, selection: &ProbeSelection, probes_dir: &Path) -> Vec<(String, PathBuf)> {
        let names: Vec<String> = match selection {
            ProbeSelection::None => return Vec::new(),
            ProbeSelection::All => PROBE_CATALOG.iter().map(|s| s.to_string()).collect(),
            ProbeSelection::Named(names) => names.clone(),
        };

        names
            .into_iter()
            .filter_map(|name| {
                let path = probes_dir.join(format!("{name}.{}", self.toolchain.script_extension));
                path.is_file().then_some((name, path))
            })
            .collect()
    }

    /// Run the selected probes. A failing probe leaves
    /// `smoke/probe_<name>_error.txt` behind and never fails the lane.
    pub async fn run_probes(
        &self,
        selection: &ProbeSelection,
        probes_dir: &Path,
        directory: &Path,
        output_dir: &Path,
        server_port: Option<u16>,
    ) -> Result<ProbeReport, SmokeError> {
        let probes = self.probe_scripts(selection, probes_dir);
        let mut report = ProbeReport::default();
        if probes.is_empty() {
            return Ok(report);
        }

        let config_path = self.write_runtime_config(output_dir, server_port)?;
        let smoke_dir = output_dir.join(SMOKE_DIR);

        for (name, script) in probes {
            let spec = self.script_spec(&script, &config_path, directory);
            let failure = match self.executor.run(&spec).await {
                Ok(output) if output.success => None,
                Ok(output) => Some(format!(
                    "exit status: {}\n\n{}",
                    output.status_label(),
                    output.stderr
                )),
                Err(e) => Some(format!("failed to run {}: {e}\n", spec.display())),
            };

            if let Some(details) = failure {
                warn!(probe = %name, "probe failed");
                std::fs::write(smoke_dir.join(format!("probe_{name}_error.txt")), details)?;
                report.failed.push(name.clone());
            }
            report.ran.push(name);
        }
        Ok(report)
    }

    /// Write `smoke_config.yml` into `output_dir` (creating `output_dir/smoke`)
    /// and return its absolute path.
    pub fn write_runtime_config(
        &self,
        output_dir: &Path,
        server_port: Option<u16>,
    ) -> Result<PathBuf, SmokeError> {
        let output_dir = absolute(output_dir)?;
        let smoke_dir = output_dir.join(SMOKE_DIR);
        std::fs::create_dir_all(&smoke_dir)?;

        let config = RuntimeConfig {
            identifier: self.identifier.clone(),
            output_dir: smoke_dir,
            server_port,
        };
        let path = output_dir.join(RUNTIME_CONFIG);
        std::fs::write(&path, serde_yaml::to_string(&config)?)?;
        Ok(path)
    }

    fn script_spec(&self, script: &Path, config_path: &Path, directory: &Path) -> CommandSpec {
        let mut argv = self.toolchain.script_runner.clone();
        argv.push(script.display().to_string());
        argv.push(config_path.display().to_string());
        CommandSpec::new(&argv, directory)
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Write `stdout.log`, `stderr.log` and `timing.txt` for a finished run.
fn write_artifacts(output_dir: &Path, result: &SmokeResult) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    std::fs::write(output_dir.join("stdout.log"), &result.stdout)?;
    std::fs::write(output_dir.join("stderr.log"), &result.stderr)?;
    std::fs::write(
        output_dir.join("timing.txt"),
        format!("{:.3}s", result.elapsed),
    )?;
    Ok(())
}
