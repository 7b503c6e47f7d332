//! Platform-specific arming of parent-death detection.
//!
//! - Linux/Android: `prctl(PR_SET_PDEATHSIG)` delivers [`PARENT_DEATH_SIGNAL`]
//!   the instant the parent dies.
//! - Other Unix: an `ITIMER_REAL` interval timer delivers [`POLL_SIGNAL`]
//!   every [`POLL_INTERVAL`]; each tick re-checks the parent pid.
//! - Anything else: rejected at compile time.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::watcher::{self, WatchError};

/// Signal the kernel delivers when the parent dies (event-driven path).
///
/// A user-defined signal, so it cannot collide with anything the runtime
/// raises on its own. The application must leave its handler alone after
/// setup.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const PARENT_DEATH_SIGNAL: Signal = Signal::SIGUSR2;

/// Signal delivered by the polling timer on platforms without a kernel
/// parent-death facility.
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub const POLL_SIGNAL: Signal = Signal::SIGALRM;

/// Period of the polling timer. Worst-case detection latency is one full
/// interval.
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Ask the kernel to signal us on parent death, then close the window where
/// the parent died after `ppid` was captured but before the request took
/// effect: no signal was queued for such a death, so deliver it ourselves and
/// let the handler's pid check decide.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn arm(ppid: Pid) -> Result<Signal, WatchError> {
    use nix::sys::prctl;
    use nix::sys::signal::raise;
    use nix::unistd::getppid;

    install_handler(PARENT_DEATH_SIGNAL)?;
    prctl::set_pdeathsig(PARENT_DEATH_SIGNAL).map_err(|source| WatchError::Arm {
        op: "prctl(PR_SET_PDEATHSIG)",
        source,
    })?;
    if getppid() != ppid {
        raise(PARENT_DEATH_SIGNAL).map_err(|source| WatchError::Arm {
            op: "raise",
            source,
        })?;
    }
    Ok(PARENT_DEATH_SIGNAL)
}

/// Arm the recurring poll timer. The first tick arrives one interval from
/// now, so a parent that is already gone is still caught within the latency
/// bound.
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub(crate) fn arm(_ppid: Pid) -> Result<Signal, WatchError> {
    install_handler(POLL_SIGNAL)?;

    let period = libc::timeval {
        tv_sec: POLL_INTERVAL.as_secs() as libc::time_t,
        tv_usec: POLL_INTERVAL.subsec_micros() as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: period,
        it_value: period,
    };
    // SAFETY: `timer` is a valid itimerval and the old value is not requested.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(WatchError::Arm {
            op: "setitimer(ITIMER_REAL)",
            source: nix::errno::Errno::last(),
        });
    }
    Ok(POLL_SIGNAL)
}

#[cfg(not(unix))]
compile_error!(
    "parent-watch requires a Unix platform: detection needs getppid() and signal delivery"
);

/// Install the shared handler for the watched signal.
///
/// `SA_RESTART` keeps the application's blocking calls undisturbed by poll
/// ticks. The watched signal stays blocked while its handler runs (no
/// `SA_NODEFER`), so the handler is not re-entered on the same thread; the
/// fired-flag compare-exchange covers every other interleaving.
fn install_handler(signal: Signal) -> Result<(), WatchError> {
    let action = SigAction::new(
        SigHandler::Handler(watcher::on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs async-signal-safe work (atomics and
    // getppid, plus one indirect call through a pre-registered function
    // pointer).
    unsafe { sigaction(signal, &action) }.map_err(|source| WatchError::Arm {
        op: "sigaction",
        source,
    })?;
    Ok(())
}
