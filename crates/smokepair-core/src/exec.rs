//! Subprocess execution seam.
//!
//! Every short-lived command smokepair runs goes through [`CommandExecutor`].
//! Long-running servers are spawned directly by [`crate::server`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// A fully resolved command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments after the program.
    pub args: Vec<String>,

    /// Working directory.
    pub current_dir: PathBuf,

    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Build a spec from an argv list (first element is the executable).
    pub fn new(argv: &[String], current_dir: impl Into<PathBuf>) -> Self {
        let (program, args) = match argv.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            current_dir: current_dir.into(),
            env: BTreeMap::new(),
        }
    }

    /// Run `command` through `sh -c`.
    pub fn shell(command: &str, current_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            &["sh".to_string(), "-c".to_string(), command.to_string()],
            current_dir,
        )
    }

    /// Add one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,

    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,

    pub success: bool,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// A successful run with the given output.
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(0),
            success: true,
            duration_ms: 0,
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
            duration_ms: 0,
        }
    }

    /// Exit code as text (`signal` when there is none).
    pub fn status_label(&self) -> String {
        self.exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

/// Backend that runs commands to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command and capture its output. An `Err` means the process
    /// could not be spawned at all; a non-zero exit is an `Ok`.
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        if spec.program.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ));
        }

        let start = Instant::now();
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.current_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Substitute `{name}` placeholders in a command template.
pub fn expand_template(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            vars.iter().fold(part.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Write a command's stdout and stderr as `<label>_stdout.log` and
/// `<label>_stderr.log` under `dir`, returning the stderr log path.
pub fn write_step_logs(dir: &Path, label: &str, output: &CommandOutput) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(format!("{label}_stdout.log")), &output.stdout)?;
    let stderr_log = dir.join(format!("{label}_stderr.log"));
    std::fs::write(&stderr_log, &output.stderr)?;
    Ok(stderr_log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_argv() {
        let spec = CommandSpec::new(
            &["bundle".to_string(), "update".to_string(), "rails".to_string()],
            "/app",
        );
        assert_eq!(spec.program, "bundle");
        assert_eq!(spec.args, vec!["update", "rails"]);
        assert_eq!(spec.display(), "bundle update rails");
    }

    #[test]
    fn test_expand_template() {
        let template = vec![
            "bundle".to_string(),
            "exec".to_string(),
            "puma".to_string(),
            "-p".to_string(),
            "{port}".to_string(),
        ];
        let argv = expand_template(&template, &[("port", "3001")]);
        assert_eq!(argv.last().map(String::as_str), Some("3001"));
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new(&["echo".to_string(), "hello".to_string()], ".");
        let output = SystemExecutor.run(&spec).await.expect("execute failed");
        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::shell("echo oops >&2; exit 3", ".");
        let output = SystemExecutor.run(&spec).await.expect("execute failed");
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert!(output.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_execute_passes_env() {
        let spec = CommandSpec::shell("printf %s \"$SMOKEPAIR_TEST_VAR\"", ".")
            .env("SMOKEPAIR_TEST_VAR", "lane-env");
        let output = SystemExecutor.run(&spec).await.expect("execute failed");
        assert_eq!(output.stdout, "lane-env");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new(&["smokepair-definitely-missing".to_string()], ".");
        assert!(SystemExecutor.run(&spec).await.is_err());
    }
}
