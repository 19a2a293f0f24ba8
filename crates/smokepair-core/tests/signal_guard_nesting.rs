//! Overlapping SignalGuards share one installation: the last guard dropped
//! restores the original dispositions, and a later install never clears a
//! signal a live guard has recorded. Separate test binary because it raises a
//! process-wide signal.

use smokepair_core::SignalGuard;

fn current_handler(signal: libc::c_int) -> libc::sighandler_t {
    // SAFETY: querying with a null new action only fills `current`.
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        assert_eq!(libc::sigaction(signal, std::ptr::null(), &mut current), 0);
        current.sa_sigaction
    }
}

#[test]
fn test_overlapping_guards_restore_once_and_keep_pending_signal() {
    let original_term = current_handler(libc::SIGTERM);
    let original_int = current_handler(libc::SIGINT);

    let first = SignalGuard::install().expect("install first guard");
    let second = SignalGuard::install().expect("install second guard");
    let recording = current_handler(libc::SIGTERM);
    assert_ne!(recording, original_term);

    // SAFETY: the recording handler is installed, so SIGTERM is only recorded.
    assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
    assert_eq!(first.pending(), Some(libc::SIGTERM));
    assert_eq!(second.pending(), Some(libc::SIGTERM));

    let third = SignalGuard::install().expect("install third guard");
    assert_eq!(third.pending(), Some(libc::SIGTERM), "joining guard keeps the recorded signal");

    drop(first);
    assert_eq!(current_handler(libc::SIGTERM), recording);
    drop(third);
    assert_eq!(current_handler(libc::SIGTERM), recording);
    drop(second);
    assert_eq!(current_handler(libc::SIGTERM), original_term);
    assert_eq!(current_handler(libc::SIGINT), original_int);

    let fresh = SignalGuard::install().expect("reinstall after all guards dropped");
    assert_eq!(fresh.pending(), None);
    drop(fresh);
    assert_eq!(current_handler(libc::SIGTERM), original_term);
}
