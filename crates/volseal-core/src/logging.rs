//! Logger bootstrap for volseal binaries.
//!
//! Everything logs through the `log` facade; `env_logger` is the backend and
//! honours `RUST_LOG` when set.

use env_logger::{Builder, Env, Target};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Initialise stderr logging with `default_level` unless `RUST_LOG` overrides it.
pub fn init(default_level: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .try_init();
}

/// Initialise logging for a provisioning run.
///
/// Foreground runs log to stderr. Background runs append to the operational
/// log file so tool output and diagnostics survive the terminal.
pub fn init_for_run(default_level: &str, foreground: bool, log_file: &Path) -> io::Result<()> {
    if foreground {
        init(default_level);
        return Ok(());
    }

    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .target(Target::Pipe(Box::new(file)))
        .try_init();
    Ok(())
}
