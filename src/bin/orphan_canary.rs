//! Companion binary: arms the parent-death watch and idles until its parent
//! dies, then exits 0. The scenario tests drive it; it doubles as a usage
//! demo.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Exits as soon as its parent process dies.
#[derive(Parser, Debug)]
#[command(name = "orphan-canary", version, about)]
struct Cli {
    /// File to create when the watcher is armed and the canary is ready
    #[arg(long)]
    ready: Option<PathBuf>,

    /// File to create (containing the delivered signal number) when the
    /// parent-death callback runs
    #[arg(long)]
    marker: Option<PathBuf>,

    /// Call setup a second time to demonstrate the fatal misuse path
    #[arg(long)]
    double_setup: bool,

    /// Give up and exit 2 if the parent is still alive after this many seconds
    #[arg(long, default_value_t = 60)]
    linger_secs: u64,
}

static MARKER: OnceLock<PathBuf> = OnceLock::new();

/// Runs in signal-handler context.
fn parent_died(signal: i32) {
    if let Some(path) = MARKER.get() {
        let _ = std::fs::write(path, signal.to_string());
    }
    std::process::exit(0);
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Some(path) = cli.marker {
        let _ = MARKER.set(path);
    }

    parent_watch::watch_parent_setup(parent_died);
    if cli.double_setup {
        // Aborts with a diagnostic before the second callback is stored.
        parent_watch::watch_parent_setup(parent_died);
    }

    if let Some(ready) = &cli.ready {
        if let Err(error) = std::fs::write(ready, b"ok") {
            tracing::warn!(%error, path = %ready.display(), "failed to write ready file");
        }
    }

    tracing::info!(pid = std::process::id(), "canary armed, waiting for parent death");
    let deadline = Instant::now() + Duration::from_secs(cli.linger_secs);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::warn!("parent still alive after linger window, giving up");
    std::process::exit(2);
}
