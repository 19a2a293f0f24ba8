//! SIGTERM arriving while both servers run aborts the comparison, stops the
//! servers and restores the default disposition. Separate test binary because
//! the smoke script signals the test process itself.

use smokepair_core::server::PID_FILE;
use smokepair_core::{FileSettings, Overrides, RunConfig, RunError, Runner, Toolchain};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        status.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&status.stderr)
    );
}

/// Repository whose smoke script signals its parent when run from a directory
/// holding `interrupt.flag`, then blocks.
fn make_slow_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    run_git(root, &["init"]);
    run_git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run_git(root, &["config", "user.name", "test-user"]);
    run_git(root, &["config", "user.email", "test@example.com"]);
    run_git(root, &["config", "commit.gpgsign", "false"]);

    std::fs::write(root.join(".gitignore"), "tmp/\n").unwrap();
    std::fs::write(root.join("Gemfile.lock"), "GEM\n  widget (1.0)\n").unwrap();
    std::fs::create_dir_all(root.join("test/smoke")).unwrap();
    std::fs::write(
        root.join("test/smoke/slow.sh"),
        "[ -f interrupt.flag ] && kill -TERM $PPID\nexec sleep 20\n",
    )
    .unwrap();

    run_git(root, &["add", "."]);
    run_git(root, &["commit", "-m", "initial"]);

    // Untracked, so only the before lane (the project root) sees it.
    std::fs::write(root.join("interrupt.flag"), "").unwrap();
    dir
}

fn sigterm_handler() -> libc::sighandler_t {
    // SAFETY: querying with a null new action only fills `current`.
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        assert_eq!(libc::sigaction(libc::SIGTERM, std::ptr::null(), &mut current), 0);
        current.sa_sigaction
    }
}

#[tokio::test]
async fn test_sigterm_during_server_run_stops_servers_and_aborts() {
    let repo = make_slow_repo();
    let before = TcpListener::bind("127.0.0.1:0").unwrap();
    let after = TcpListener::bind("127.0.0.1:0").unwrap();
    let settings = FileSettings {
        dependency: Some("widget".to_string()),
        server: Some(true),
        before_port: Some(before.local_addr().unwrap().port()),
        after_port: Some(after.local_addr().unwrap().port()),
        toolchain: Toolchain {
            update_command: vec!["sh".to_string(), "-c".to_string(), "echo updated".to_string()],
            server_command: vec!["sleep".to_string(), "30".to_string()],
            script_runner: vec!["sh".to_string()],
            script_extension: "sh".to_string(),
            ..Toolchain::default()
        },
        ..FileSettings::default()
    };
    let config = RunConfig::from_settings(repo.path(), settings, &Overrides::default()).unwrap();
    let runner = Runner::new(Arc::new(config))
        .with_server_timing(Duration::from_secs(5), Duration::from_millis(100))
        .with_stop_grace(Duration::from_secs(2));
    let original = sigterm_handler();

    let started = Instant::now();
    let err = runner.run().await.unwrap_err();

    assert!(
        matches!(err, RunError::Interrupted(libc::SIGTERM)),
        "unexpected error: {err}"
    );
    assert_eq!(err.exit_code(), 143);
    assert!(started.elapsed() < Duration::from_secs(15), "smoke scripts were not abandoned");

    let root = runner.output_root();
    for lane in ["before", "after"] {
        assert!(root.join(lane).join("server_stdout.log").is_file(), "{lane} server started");
        assert!(!root.join(lane).join(PID_FILE).exists(), "{lane} pid-file left behind");
    }
    assert!(!root.join("worktree").exists(), "worktree removed after the interrupt");
    assert_eq!(sigterm_handler(), original);
}
