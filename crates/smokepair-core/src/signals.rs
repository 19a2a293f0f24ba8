//! Scoped SIGINT/SIGTERM handling.
//!
//! While at least one [`SignalGuard`] is alive, SIGINT and SIGTERM no longer
//! terminate the process; the signal number is recorded instead and surfaced
//! through [`SignalGuard::pending`] and [`SignalGuard::wait`].
//!
//! Guards may overlap (concurrent runs in one process). The first guard saves
//! the dispositions in effect before it and the last one dropped reinstates
//! them. A recorded signal is shared by every live guard.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const HANDLED: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];
const WAIT_POLL: Duration = Duration::from_millis(100);

static PENDING: AtomicI32 = AtomicI32::new(0);
static INSTALLED: Mutex<Installed> = Mutex::new(Installed {
    guards: 0,
    previous: Vec::new(),
});

/// Process-wide bookkeeping shared by all live guards.
struct Installed {
    guards: usize,
    previous: Vec<(libc::c_int, libc::sigaction)>,
}

extern "C" fn record_signal(signal: libc::c_int) {
    PENDING.store(signal, Ordering::SeqCst);
}

fn installed() -> MutexGuard<'static, Installed> {
    INSTALLED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Put back every saved disposition, newest first.
fn restore(previous: &mut Vec<(libc::c_int, libc::sigaction)>) {
    while let Some((signal, action)) = previous.pop() {
        // SAFETY: `action` was filled in by the kernel in `install`.
        unsafe {
            libc::sigaction(signal, &action, std::ptr::null_mut());
        }
    }
}

/// RAII guard for the interruptible section of a run.
pub struct SignalGuard {
    _private: (),
}

impl SignalGuard {
    /// Install the recording handler for SIGINT and SIGTERM, or join the
    /// guards already holding it.
    pub fn install() -> io::Result<Self> {
        let mut state = installed();
        if state.guards > 0 {
            state.guards += 1;
            return Ok(Self { _private: () });
        }

        PENDING.store(0, Ordering::SeqCst);
        for signal in HANDLED {
            // SAFETY: both sigaction structs are zero-initialised plain data
            // and fully set up before use. The handler only performs an atomic
            // store, which is async-signal-safe.
            let previous = unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = record_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&mut action.sa_mask);

                let mut previous: libc::sigaction = std::mem::zeroed();
                if libc::sigaction(signal, &action, &mut previous) != 0 {
                    let err = io::Error::last_os_error();
                    restore(&mut state.previous);
                    return Err(err);
                }
                previous
            };
            state.previous.push((signal, previous));
        }
        state.guards = 1;
        Ok(Self { _private: () })
    }

    /// The signal received since the first live guard was installed, if any.
    pub fn pending(&self) -> Option<i32> {
        match PENDING.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    /// Resolve with the signal number once one has been received.
    pub async fn wait(&self) -> i32 {
        loop {
            if let Some(signal) = self.pending() {
                return signal;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let mut state = installed();
        state.guards = state.guards.saturating_sub(1);
        if state.guards == 0 {
            restore(&mut state.previous);
        }
    }
}

impl std::fmt::Debug for SignalGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalGuard")
            .field("guards", &installed().guards)
            .field("pending", &self.pending())
            .finish()
    }
}
