//! Self-terminate instead of becoming an orphan.
//!
//! A helper process that outlives its parent usually has no business running:
//! shell hooks and supervised workers want to fold up when whoever started
//! them is gone. This crate arms a process-wide watcher that
//! invokes a user-supplied callback exactly once when the parent process is
//! detected to have died; the callback decides what happens next (typically
//! cleanup followed by `process::exit`).
//!
//! Detection is event-driven on Linux and Android via the kernel's
//! parent-death signal, and timer-polled on other Unix platforms. Non-Unix
//! platforms are rejected at compile time.
//!
//! ```no_run
//! fn parent_died(_signal: i32) {
//!     std::process::exit(0);
//! }
//!
//! parent_watch::watch_parent_setup(parent_died);
//! ```
//!
//! Setup may be called once per process, at startup, while the parent is
//! still alive; a second call aborts the process. The installed signal
//! handler (and poll timer, where used) stays armed until process exit.

mod platform;
mod watcher;

pub use watcher::{watch_parent_setup, SignalCallback};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use platform::PARENT_DEATH_SIGNAL;
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub use platform::{POLL_INTERVAL, POLL_SIGNAL};
