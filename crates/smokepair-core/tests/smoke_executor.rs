//! Integration tests for the smoke executor against real shell scripts.

use smokepair_core::smoke::{RUNTIME_CONFIG, SMOKE_DIR};
use smokepair_core::{ProbeSelection, SmokeExecutor, SystemExecutor, Toolchain};
use std::path::Path;
use std::sync::Arc;

fn shell_toolchain() -> Toolchain {
    Toolchain {
        script_runner: vec!["sh".to_string()],
        script_extension: "sh".to_string(),
        ..Toolchain::default()
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn executor(root: &Path) -> SmokeExecutor {
    SmokeExecutor::new("rails", root, shell_toolchain(), Arc::new(SystemExecutor))
}

/// Test: scripts run in order in the lane directory and see the runtime config
#[tokio::test]
async fn test_scripts_run_with_runtime_config() {
    let root = tempfile::tempdir().unwrap();
    let lane = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(lane.path().join("marker.txt"), "lane-dir\n").unwrap();

    write_script(
        &root.path().join("test/smoke/a_boot.sh"),
        "cat marker.txt\ncat \"$1\"\n",
    );
    write_script(
        &root.path().join("test/smoke/b_write.sh"),
        "dir=$(sed -n 's/^output_dir: //p' \"$1\")\necho routes-ok > \"$dir/routes.txt\"\necho warn >&2\n",
    );

    let result = executor(root.path())
        .run(lane.path(), out.path(), Some(3001))
        .await
        .unwrap();

    assert!(result.success, "stderr: {}", result.stderr);
    assert!(result.stdout.starts_with("lane-dir\n"));
    assert!(result.stdout.contains("identifier: rails"));
    assert!(result.stdout.contains("server_port: 3001"));
    assert_eq!(result.stderr, "warn\n");

    let routes = std::fs::read_to_string(out.path().join(SMOKE_DIR).join("routes.txt")).unwrap();
    assert_eq!(routes, "routes-ok\n");
    assert!(out.path().join(RUNTIME_CONFIG).is_file());
    assert_eq!(
        std::fs::read_to_string(out.path().join("stdout.log")).unwrap(),
        result.stdout
    );
    let timing = std::fs::read_to_string(out.path().join("timing.txt")).unwrap();
    assert!(timing.ends_with('s'));
}

/// Test: one failing script fails the lane but the rest still run
#[tokio::test]
async fn test_failing_script_fails_lane() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_script(&root.path().join("test/smoke/a_fail.sh"), "echo broken >&2\nexit 1\n");
    write_script(&root.path().join("test/smoke/b_ok.sh"), "echo still-ran\n");

    let result = executor(root.path())
        .run(root.path(), out.path(), None)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.stdout, "still-ran\n");
    assert_eq!(result.stderr, "broken\n");
}

/// Test: run_command captures a shell command's output and writes artifacts
#[tokio::test]
async fn test_run_command_artifacts() {
    let lane = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let result = executor(lane.path())
        .run_command("echo hello; echo oops >&2; exit 4", lane.path(), out.path())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "oops\n");
    assert_eq!(
        std::fs::read_to_string(out.path().join("stderr.log")).unwrap(),
        "oops\n"
    );
    let timing = std::fs::read_to_string(out.path().join("timing.txt")).unwrap();
    assert!(timing.ends_with('s'));
}

/// Test: failing probes leave error files; missing probes are skipped
#[tokio::test]
async fn test_probes_write_error_files() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let probes_dir = root.path().join(".smokepair/probes");
    write_script(&probes_dir.join("routes.sh"), "test -f \"$1\"\n");
    write_script(&probes_dir.join("ssl_certs.sh"), "echo no certs >&2\nexit 2\n");

    let smoke = executor(root.path());
    let selection = ProbeSelection::Named(vec![
        "ssl_certs".to_string(),
        "routes".to_string(),
        "boot_and_load".to_string(),
    ]);
    let report = smoke
        .run_probes(&selection, &probes_dir, root.path(), out.path(), None)
        .await
        .unwrap();

    assert_eq!(report.ran, vec!["ssl_certs", "routes"]);
    assert_eq!(report.failed, vec!["ssl_certs"]);

    let error = std::fs::read_to_string(out.path().join("smoke/probe_ssl_certs_error.txt")).unwrap();
    assert!(error.contains('2'));
    assert!(error.contains("no certs"));
    assert!(!out.path().join("smoke/probe_routes_error.txt").exists());
}

/// Test: `All` follows catalog order and ignores probes not on disk
#[tokio::test]
async fn test_all_probes_follow_catalog_order() {
    let root = tempfile::tempdir().unwrap();
    let probes_dir = root.path().join("probes");
    write_script(&probes_dir.join("ssl_certs.sh"), "true\n");
    write_script(&probes_dir.join("boot_and_load.sh"), "true\n");
    write_script(&probes_dir.join("unlisted.sh"), "true\n");

    let names: Vec<String> = executor(root.path())
        .probe_scripts(&ProbeSelection::All, &probes_dir)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["boot_and_load", "ssl_certs"]);
}
