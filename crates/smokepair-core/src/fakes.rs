//! In-memory test doubles.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};

/// Executor that records every command and replays scripted outputs.
///
/// Responses are consumed in order; once exhausted every command succeeds
/// with empty output.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<VecDeque<CommandOutput>>,
    worktree_dirs: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the directory named by each `git worktree add`, so real
    /// processes can be started inside a fake worktree.
    pub fn with_worktree_dirs(mut self) -> Self {
        self.worktree_dirs = true;
        self
    }

    /// Queue the output for the next unanswered command.
    pub fn push_response(&self, output: CommandOutput) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(output);
        }
    }

    /// Commands run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Argument vectors of the commands run so far.
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls().iter().map(CommandSpec::argv).collect()
    }
}

fn worktree_add() -> [String; 2] {
    ["worktree".to_string(), "add".to_string()]
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        if self.worktree_dirs && spec.program == "git" && spec.args.starts_with(&worktree_add()) {
            if let Some(path) = spec.args.iter().rev().nth(1) {
                std::fs::create_dir_all(spec.current_dir.join(path))?;
            }
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        Ok(next.unwrap_or_else(|| CommandOutput::success("", "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_replays() {
        let fake = RecordingExecutor::new();
        fake.push_response(CommandOutput::failure(1, "boom"));

        let spec = CommandSpec::new(&["git".to_string(), "status".to_string()], ".");
        let first = fake.run(&spec).await.unwrap();
        let second = fake.run(&spec).await.unwrap();

        assert!(!first.success);
        assert!(second.success);
        assert_eq!(fake.calls().len(), 2);
        assert_eq!(fake.argvs()[0], vec!["git", "status"]);
    }

    #[tokio::test]
    async fn test_worktree_dirs_are_created_on_request() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/worktree");
        let argv: Vec<String> = ["git", "worktree", "add", "--detach", "--force"]
            .iter()
            .map(|s| s.to_string())
            .chain([path.display().to_string(), "HEAD".to_string()])
            .collect();
        let spec = CommandSpec::new(&argv, tmp.path());

        RecordingExecutor::new().run(&spec).await.unwrap();
        assert!(!path.exists());

        RecordingExecutor::new().with_worktree_dirs().run(&spec).await.unwrap();
        assert!(path.is_dir());
    }
}
