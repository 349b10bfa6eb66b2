//! Logging setup.
//!
//! Everything logs through `tracing`; this module only installs the
//! subscriber.  Inside the game the output goes to a file next to the
//! executable, since a DLL has no console.  `RUST_LOG` overrides the default
//! filter in both cases.
//!
//! Installing a subscriber when one is already set (a second attach in the
//! same process, or a test harness) is silently ignored.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Default filter for the in-game log file.
pub const DEFAULT_FILE_FILTER: &str = "gsr_proxy=debug,gsr_core=debug,info";

/// Default file name for the in-game log.
pub const DEFAULT_LOG_FILE: &str = "GSReplacement.log";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Appends log lines to `path`.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be opened.
pub fn init_file(path: &Path, default_filter: &str) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init();
    Ok(())
}

/// Writes log lines to stderr.
pub fn init_stderr(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_writer(io::stderr)
        .try_init();
}
