//! Dependency update inside a provisioned environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Toolchain;
use crate::diff;
use crate::error::UpdateError;
use crate::exec::{expand_template, CommandExecutor, CommandOutput, CommandSpec};

pub const UPDATE_LOG: &str = "dependency_update.log";
pub const INSTALL_LOG: &str = "dependency_install.log";
pub const LOCKFILE_DIFF: &str = "lockfile.diff";

/// Result of an update or install command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub success: bool,
    pub log_path: PathBuf,
    pub lockfile_diff_path: Option<PathBuf>,
}

/// Runs the toolchain's update and install commands and records the
/// resulting lockfile delta.
#[derive(Clone)]
pub struct DependencyUpdater {
    toolchain: Toolchain,
    project_root: PathBuf,
    output_root: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl DependencyUpdater {
    pub fn new(
        toolchain: Toolchain,
        project_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            toolchain,
            project_root: project_root.into(),
            output_root: output_root.into(),
            executor,
        }
    }

    /// Update `dependency` in `env_path`, optionally pinning it to `version`
    /// first. The lockfile diff against the project root is written whether
    /// or not the command succeeds.
    pub async fn update(
        &self,
        env_path: &Path,
        dependency: &str,
        version: Option<&str>,
    ) -> Result<UpdateOutcome, UpdateError> {
        if let Some(version) = version {
            pin_manifest(&env_path.join(&self.toolchain.manifest), dependency, version)?;
        }

        let argv = expand_template(
            &self.toolchain.update_command,
            &[("dependency", dependency)],
        );
        let spec = CommandSpec::new(&argv, env_path);
        let output = self.run_logged(&spec, UPDATE_LOG).await?;

        let diff_path = self.write_lockfile_diff(&self.project_root, env_path)?;
        info!(
            dependency,
            success = output.success,
            "dependency update finished"
        );

        Ok(UpdateOutcome {
            success: output.success,
            log_path: self.output_root.join(UPDATE_LOG),
            lockfile_diff_path: Some(diff_path),
        })
    }

    /// Install the locked dependencies of `env_path`.
    pub async fn install(&self, env_path: &Path) -> Result<UpdateOutcome, UpdateError> {
        let spec = CommandSpec::new(&self.toolchain.install_command, env_path);
        let output = self.run_logged(&spec, INSTALL_LOG).await?;

        Ok(UpdateOutcome {
            success: output.success,
            log_path: self.output_root.join(INSTALL_LOG),
            lockfile_diff_path: None,
        })
    }

    /// Write the unified diff of the two lockfiles to `lockfile.diff`.
    pub fn write_lockfile_diff(
        &self,
        before_dir: &Path,
        after_dir: &Path,
    ) -> Result<PathBuf, UpdateError> {
        write_lockfile_diff(before_dir, after_dir, &self.output_root, &self.toolchain.lockfile)
            .map_err(UpdateError::from)
    }

    async fn run_logged(&self, spec: &CommandSpec, log_name: &str) -> Result<CommandOutput, UpdateError> {
        let output = self
            .executor
            .run(spec)
            .await
            .map_err(|source| UpdateError::Spawn {
                command: spec.display(),
                source,
            })?;

        std::fs::create_dir_all(&self.output_root)?;
        let log = format!("$ {}\n\n{}\n{}", spec.display(), output.stdout, output.stderr);
        std::fs::write(self.output_root.join(log_name), log)?;

        if !output.success {
            warn!(
                command = %spec.display(),
                exit = %output.status_label(),
                "dependency command failed"
            );
        }
        Ok(output)
    }
}

/// Diff `before_dir/<lockfile>` against `after_dir/<lockfile>` into
/// `<output_root>/lockfile.diff`. Missing lockfiles are empty.
pub fn write_lockfile_diff(
    before_dir: &Path,
    after_dir: &Path,
    output_root: &Path,
    lockfile: &str,
) -> std::io::Result<PathBuf> {
    let text = diff::diff_files(
        &before_dir.join(lockfile),
        &after_dir.join(lockfile),
        &format!("before/{lockfile}"),
        &format!("after/{lockfile}"),
    );
    std::fs::create_dir_all(output_root)?;
    let path = output_root.join(LOCKFILE_DIFF);
    std::fs::write(&path, text)?;
    Ok(path)
}

/// Rewrite the manifest at `path` so `dependency` is pinned to `version`.
pub fn pin_manifest(path: &Path, dependency: &str, version: &str) -> Result<(), UpdateError> {
    let manifest_error = |source| UpdateError::Manifest {
        path: path.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(path).map_err(manifest_error)?;
    std::fs::write(path, pin_version(&content, dependency, version)).map_err(manifest_error)
}

/// Pin `dependency` to exactly `version` in manifest text.
///
/// Every `gem "<dependency>"` declaration has its version constraints
/// replaced; keyword options and trailing comments are kept. When no
/// declaration exists a new one is appended.
pub fn pin_version(manifest: &str, dependency: &str, version: &str) -> String {
    let mut out = String::with_capacity(manifest.len() + 32);
    let mut found = false;

    for line in manifest.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        match pin_declaration(body, dependency, version) {
            Some(pinned) => {
                found = true;
                out.push_str(&pinned);
                out.push_str(newline);
            }
            None => out.push_str(line),
        }
    }

    if !found {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("gem \"{dependency}\", \"{version}\"\n"));
    }
    out
}

fn pin_declaration(line: &str, dependency: &str, version: &str) -> Option<String> {
    let rest = line.trim_start();
    let indent = &line[..line.len() - rest.len()];

    let rest = rest.strip_prefix("gem")?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let rest = rest.trim_start();

    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = rest[1..].strip_prefix(dependency)?;
    let rest = rest.strip_prefix(quote)?;

    let (args, comment) = split_comment(rest);
    let args = args.trim();
    if !args.is_empty() && !args.starts_with(',') {
        return None;
    }

    let kept: Vec<&str> = split_top_level(args.strip_prefix(',').unwrap_or(args))
        .into_iter()
        .map(str::trim)
        .filter(|arg| !arg.is_empty() && !is_quoted(arg))
        .collect();

    let mut pinned = format!("{indent}gem \"{dependency}\", \"{version}\"");
    for arg in kept {
        pinned.push_str(", ");
        pinned.push_str(arg);
    }
    if let Some(comment) = comment {
        pinned.push(' ');
        pinned.push_str(comment);
    }
    Some(pinned)
}

fn is_quoted(arg: &str) -> bool {
    arg.len() >= 2
        && ((arg.starts_with('"') && arg.ends_with('"'))
            || (arg.starts_with('\'') && arg.ends_with('\'')))
}

/// Split off a trailing `# comment` that is outside any string literal.
fn split_comment(text: &str) -> (&str, Option<&str>) {
    let mut quote: Option<char> = None;
    for (idx, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => return (&text[..idx], Some(text[idx..].trim_end())),
            _ => {}
        }
    }
    (text, None)
}

/// Split at commas not nested in quotes or brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
