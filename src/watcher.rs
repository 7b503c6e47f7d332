//! The parent-liveness watcher: process-wide state plus the signal handler
//! that checks orphanhood and hands control to the registered callback.
//!
//! A process arms the watcher once at startup via [`watch_parent_setup`].
//! From then on the OS (or, on platforms without a parent-death facility, a
//! recurring timer) delivers a signal; the handler compares the current parent
//! pid against the one captured at setup and fires the callback at most once.

use std::fmt;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::OnceLock;

use nix::unistd::getppid;
use tracing::{error, info};

use crate::platform;

/// Callback invoked when the parent process is detected to have died.
///
/// Receives the number of the signal that triggered detection. The callback
/// runs in signal-handler context: it must restrict itself to async-signal-safe
/// work, and it is responsible for terminating the process if that is the
/// desired outcome. The watcher never calls `exit` itself.
pub type SignalCallback = fn(i32);

/// Process-wide watcher state.
///
/// The callback is registered at most once per process, and `fired` flips
/// false to true exactly once, so nested or repeated signal deliveries can
/// never invoke the callback twice.
pub(crate) struct WatcherState {
    callback: OnceLock<SignalCallback>,
    fired: AtomicBool,
    ppid_at_setup: AtomicI32,
}

impl WatcherState {
    pub(crate) const fn new() -> Self {
        Self {
            callback: OnceLock::new(),
            fired: AtomicBool::new(false),
            ppid_at_setup: AtomicI32::new(0),
        }
    }

    /// Store the callback and the parent pid observed at setup time.
    ///
    /// First registration wins; a second attempt fails without touching the
    /// stored callback or pid.
    pub(crate) fn register(
        &self,
        callback: SignalCallback,
        ppid: libc::pid_t,
    ) -> Result<(), WatchError> {
        self.callback
            .set(callback)
            .map_err(|_| WatchError::AlreadyRegistered)?;
        self.ppid_at_setup.store(ppid, Ordering::SeqCst);
        Ok(())
    }

    /// Decide whether the parent has died and fire the callback if so.
    ///
    /// Runs in signal-handler context: nothing beyond atomic loads, one
    /// compare-exchange and one indirect call. Returns true only on the single
    /// invocation that actually fired.
    pub(crate) fn check_and_fire(&self, current_ppid: libc::pid_t, signum: i32) -> bool {
        if self.fired.load(Ordering::SeqCst) {
            return false;
        }
        let Some(callback) = self.callback.get() else {
            return false;
        };
        // A delivery while the parent is alive is spurious: somebody sent us
        // the watched signal directly, or a poll tick found nothing.
        if current_ppid == self.ppid_at_setup.load(Ordering::SeqCst) {
            return false;
        }
        // Nested deliveries race here; exactly one wins the flip.
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        callback(signum);
        true
    }
}

static WATCHER: WatcherState = WatcherState::new();

/// Arm the parent-death watch for this process.
///
/// Captures the current parent pid, registers `callback`, and installs the
/// platform detection mechanism: on Linux/Android a kernel-requested
/// parent-death signal, on other Unix platforms a recurring interval timer
/// that re-checks the parent pid. The installed signal handler and timer stay
/// active until the process exits; there is no tear-down.
///
/// Must be called at most once per process, while the original parent is still
/// alive. A second call is a programmer error and aborts the process with a
/// diagnostic; it never silently replaces the first callback. A parent that
/// died before this call is not detected.
///
/// The application must not re-register a conflicting handler for the watched
/// signal afterwards.
pub fn watch_parent_setup(callback: SignalCallback) {
    let ppid = getppid();
    if let Err(err) = WATCHER.register(callback, ppid.as_raw()) {
        fatal(err);
    }
    let signal = match platform::arm(ppid) {
        Ok(signal) => signal,
        Err(err) => fatal(err),
    };
    info!(ppid = ppid.as_raw(), signal = %signal, "parent-death watch armed");
}

/// Signal handler shared by both detection strategies.
///
/// Restricted to async-signal-safe operations; all logging and error handling
/// happens at setup time, never here.
pub(crate) extern "C" fn on_signal(signum: libc::c_int) {
    WATCHER.check_and_fire(getppid().as_raw(), signum);
}

fn fatal(err: WatchError) -> ! {
    error!(error = %err, "parent-death watch setup failed");
    eprintln!("parent-watch: fatal: {err}");
    process::abort();
}

/// Setup failures. Both variants are fatal at the public boundary: an unarmed
/// watcher would let the process outlive its parent silently.
#[derive(Debug)]
pub(crate) enum WatchError {
    /// `watch_parent_setup` was called a second time in the same process.
    AlreadyRegistered,
    /// An OS call failed while arming detection.
    Arm {
        op: &'static str,
        source: nix::Error,
    },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::AlreadyRegistered => {
                write!(
                    f,
                    "watch_parent_setup called twice: the parent-death callback \
                     can only be registered once per process"
                )
            }
            WatchError::Arm { op, source } => {
                write!(f, "failed to arm parent-death detection ({op}): {source}")
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::AlreadyRegistered => None,
            WatchError::Arm { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // The fake parent pid handed to `register`; any other value passed to
    // `check_and_fire` means "the parent changed underneath us".
    const PARENT: libc::pid_t = 4242;
    const REAPER: libc::pid_t = 1;
    const SIGNUM: i32 = 12;

    #[test]
    fn test_fires_exactly_once_after_parent_death() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn callback(_signal: i32) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let state = WatcherState::new();
        state.register(callback, PARENT).unwrap();

        assert!(state.check_and_fire(REAPER, SIGNUM));
        for _ in 0..5 {
            assert!(!state.check_and_fire(REAPER, SIGNUM));
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_fire_while_parent_alive() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn callback(_signal: i32) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let state = WatcherState::new();
        state.register(callback, PARENT).unwrap();

        // Spurious deliveries: the observed parent pid never changes.
        for _ in 0..10 {
            assert!(!state.check_and_fire(PARENT, SIGNUM));
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        // The real thing still fires afterwards.
        assert!(state.check_and_fire(REAPER, SIGNUM));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_before_registration_is_ignored() {
        let state = WatcherState::new();
        assert!(!state.check_and_fire(REAPER, SIGNUM));
    }

    #[test]
    fn test_second_registration_rejected_first_wins() {
        static FIRST: AtomicUsize = AtomicUsize::new(0);
        static SECOND: AtomicUsize = AtomicUsize::new(0);
        fn first(_signal: i32) {
            FIRST.fetch_add(1, Ordering::SeqCst);
        }
        fn second(_signal: i32) {
            SECOND.fetch_add(1, Ordering::SeqCst);
        }

        let state = WatcherState::new();
        state.register(first, PARENT).unwrap();
        assert!(matches!(
            state.register(second, PARENT),
            Err(WatchError::AlreadyRegistered)
        ));

        assert!(state.check_and_fire(REAPER, SIGNUM));
        assert_eq!(FIRST.load(Ordering::SeqCst), 1);
        assert_eq!(SECOND.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_receives_signal_number() {
        static SEEN: AtomicI32 = AtomicI32::new(0);
        fn callback(signal: i32) {
            SEEN.store(signal, Ordering::SeqCst);
        }

        let state = WatcherState::new();
        state.register(callback, PARENT).unwrap();
        assert!(state.check_and_fire(REAPER, SIGNUM));
        assert_eq!(SEEN.load(Ordering::SeqCst), SIGNUM);
    }

    #[test]
    fn test_concurrent_deliveries_fire_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn callback(_signal: i32) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let state = WatcherState::new();
        state.register(callback, PARENT).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        state.check_and_fire(REAPER, SIGNUM);
                    }
                });
            }
        });
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
