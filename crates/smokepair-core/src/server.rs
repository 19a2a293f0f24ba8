//! Application server lifecycle.
//!
//! A [`ServerProcess`] owns one long-running server child per lane. The pid is
//! also written to `server.pid` in the lane directory so that a crashed or
//! interrupted run can be cleaned up by the next one ([`cleanup_stale`]).

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ServerStartError;
use crate::exec::expand_template;
use crate::lane::Lane;
use crate::obs;

pub const PID_FILE: &str = "server.pid";
pub const STDOUT_LOG: &str = "server_stdout.log";
pub const STDERR_LOG: &str = "server_stderr.log";

pub const READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Ready,
    Failed,
}

/// One lane's server process.
#[derive(Debug)]
pub struct ServerProcess {
    lane: Lane,
    port: u16,
    log_dir: PathBuf,
    env: BTreeMap<String, String>,
    command: Vec<String>,
    child: Option<Child>,
    state: ServerState,
    ready_timeout: Duration,
    poll_interval: Duration,
    stop_grace: Duration,
}

impl ServerProcess {
    /// `command` is an argv template; `{port}` is replaced with `port`.
    pub fn new(
        lane: Lane,
        port: u16,
        log_dir: impl Into<PathBuf>,
        env: BTreeMap<String, String>,
        command: Vec<String>,
    ) -> Self {
        Self {
            lane,
            port,
            log_dir: log_dir.into(),
            env,
            command,
            child: None,
            state: ServerState::Stopped,
            ready_timeout: READY_TIMEOUT,
            poll_interval: READY_POLL_INTERVAL,
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Pid of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.log_dir.join(PID_FILE)
    }

    /// Spawn the server in `directory` and wait until its port accepts
    /// connections. On failure the process is stopped before returning.
    pub async fn start(&mut self, directory: &Path) -> Result<(), ServerStartError> {
        self.state = ServerState::Starting;

        if let Err(e) = self.spawn(directory) {
            self.state = ServerState::Failed;
            self.stop().await;
            return Err(e);
        }

        match self.wait_for_ready().await {
            Ok(()) => {
                self.state = ServerState::Ready;
                obs::emit_server_ready(self.lane, self.port);
                Ok(())
            }
            Err(e) => {
                self.state = ServerState::Failed;
                warn!(lane = %self.lane, port = self.port, error = %e, "server failed to start");
                self.stop().await;
                Err(e)
            }
        }
    }

    fn spawn(&mut self, directory: &Path) -> Result<(), ServerStartError> {
        let port = self.port.to_string();
        let argv = expand_template(&self.command, &[("port", port.as_str())]);
        let (program, args) = argv.split_first().ok_or(ServerStartError::EmptyCommand)?;

        std::fs::create_dir_all(&self.log_dir)?;
        let stdout = std::fs::File::create(self.log_dir.join(STDOUT_LOG))?;
        let stderr = std::fs::File::create(self.log_dir.join(STDERR_LOG))?;

        debug!(lane = %self.lane, command = %argv.join(" "), "spawning server");
        let child = Command::new(program)
            .args(args)
            .current_dir(directory)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServerStartError::Spawn {
                port: self.port,
                command: argv.join(" "),
                source,
            })?;

        if let Some(pid) = child.id() {
            std::fs::write(self.pid_file(), pid.to_string())?;
        }
        self.child = Some(child);
        Ok(())
    }

    async fn wait_for_ready(&mut self) -> Result<(), ServerStartError> {
        let deadline = Instant::now() + self.ready_timeout;

        loop {
            if port_open(self.port, self.poll_interval).await {
                return Ok(());
            }

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(ServerStartError::Exited {
                        port: self.port,
                        status: status.to_string(),
                        log: self.log_dir.join(STDERR_LOG),
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(ServerStartError::Timeout {
                    port: self.port,
                    timeout: self.ready_timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Terminate the server and remove its pid-file. Safe to call repeatedly
    /// and on a server that never started.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                if let Err(e) = send_signal(pid, libc::SIGTERM) {
                    if e.raw_os_error() != Some(libc::ESRCH) {
                        warn!(lane = %self.lane, pid, error = %e, "failed to signal server");
                    }
                }

                if timeout(self.stop_grace, child.wait()).await.is_err() {
                    warn!(lane = %self.lane, pid, "server ignored SIGTERM, killing");
                    if let Err(e) = child.kill().await {
                        warn!(lane = %self.lane, pid, error = %e, "failed to kill server");
                    }
                }
            }
            obs::emit_server_stopped(self.lane, self.port);
        }

        remove_pid_file(&self.pid_file());
        self.state = ServerState::Stopped;
    }
}

/// Whether a TCP connection to `127.0.0.1:port` succeeds within `limit`.
pub async fn port_open(port: u16, limit: Duration) -> bool {
    matches!(
        timeout(limit, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Terminate every process recorded in a `server.pid` file under `root` and
/// delete the pid-files. Returns the number of pid-files handled.
pub async fn cleanup_stale(root: &Path, grace: Duration) -> usize {
    let pid_files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == PID_FILE)
        .map(|entry| entry.into_path())
        .collect();

    for path in &pid_files {
        match read_pid(path) {
            Some(pid) => {
                info!(pid, pid_file = %path.display(), "stopping stale server");
                terminate_pid(pid, grace).await;
            }
            None => warn!(pid_file = %path.display(), "ignoring unreadable pid-file"),
        }
        remove_pid_file(path);
    }
    pid_files.len()
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(pid_file = %path.display(), error = %e, "failed to remove pid-file");
        }
    }
}

async fn terminate_pid(pid: u32, grace: Duration) {
    if let Err(e) = send_signal(pid, libc::SIGTERM) {
        if e.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %e, "failed to signal stale server");
        }
        return;
    }

    if wait_gone(pid, grace).await {
        return;
    }

    warn!(pid, "stale server ignored SIGTERM, killing");
    if send_signal(pid, libc::SIGKILL).is_ok() {
        wait_gone(pid, Duration::from_secs(1)).await;
    }
}

async fn wait_gone(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if reap(pid) || !process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

/// Reap `pid` if it is an exited child of this process.
fn reap(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    let mut status = 0;
    // SAFETY: waitpid with WNOHANG never blocks; for a pid that is not our
    // child it fails with ECHILD and has no effect.
    let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    result == pid
}

fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if pid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pid <= 0"));
    }
    // SAFETY: kill has no memory-safety preconditions; pid is positive so
    // this never targets a process group.
    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether a process with `pid` exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for existence.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // EPERM: exists but belongs to someone else.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
