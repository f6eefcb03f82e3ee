//! Host-wide single-instance lock.
//!
//! The lock is a directory created with an atomic `mkdir`; the owner's pid is
//! written inside it. A directory whose recorded pid is dead is stale and is
//! reclaimed by the next caller. Acquirers serialise on an `flock` of the
//! sibling `<lock_dir>.guard` file; the guard is never held while provisioning.

use crate::error::{VolsealError, VolsealResult, EXIT_SIGNAL_BASE};
use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;

pub const PID_FILE_NAME: &str = "volseal.pid";
const MAX_RECLAIM_ATTEMPTS: usize = 3;

/// Read-only view of the lock directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    Held(i32),
    Stale(i32),
    /// Directory present but the pid file is missing or garbled.
    Ambiguous,
}

/// Guard for the lock directory. Dropping it releases the lock.
#[derive(Debug)]
pub struct ProcessLock {
    dir: PathBuf,
    pid: i32,
    released: bool,
}

impl ProcessLock {
    /// Take the lock or fail immediately; never waits for a live holder.
    ///
    /// Creation and stale reclaim run under an `flock` on a sibling guard
    /// file, so a dead owner's directory is replaced by exactly one caller.
    pub fn acquire<P: AsRef<Path>>(lock_dir: P) -> VolsealResult<Self> {
        let dir: PathBuf = lock_dir.as_ref().components().collect();
        if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let pid = current_pid();
        let _guard = ReclaimGuard::lock(&dir)?;

        for attempt in 0..=MAX_RECLAIM_ATTEMPTS {
            match fs::create_dir(&dir) {
                Ok(()) => {
                    if let Err(err) = fs::write(dir.join(PID_FILE_NAME), format!("{pid}\n")) {
                        let _ = fs::remove_dir_all(&dir);
                        return Err(err.into());
                    }
                    info!("lock acquired at {} (pid {pid})", dir.display());
                    return Ok(Self {
                        dir,
                        pid,
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    match read_pid(&dir) {
                        None => {
                            return Err(lock_fail(
                                &dir,
                                "pid file missing or unreadable; ownership is ambiguous",
                            ))
                        }
                        Some(holder) if process_alive(holder) => {
                            return Err(lock_fail(&dir, format!("held by live process {holder}")))
                        }
                        Some(holder) => {
                            warn!(
                                "reclaiming stale lock {} left by dead process {holder} (attempt {})",
                                dir.display(),
                                attempt + 1
                            );
                            match fs::remove_dir_all(&dir) {
                                Ok(()) => {}
                                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                                Err(err) => return Err(err.into()),
                            }
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(lock_fail(
            &dir,
            format!("stale lock reclaimed {MAX_RECLAIM_ATTEMPTS} times without winning it"),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Remove the lock directory. Safe to call more than once.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        remove_if_owned(&self.dir, self.pid)?;
        self.released = true;
        debug!("lock released at {}", self.dir.display());
        Ok(())
    }

    /// Spawn a watcher that removes the lock and exits on SIGINT, SIGQUIT, or
    /// SIGTERM with status `128 + signo`.
    pub fn watch_signals(&self) -> VolsealResult<()> {
        let mut signals = Signals::new([SIGINT, SIGQUIT, SIGTERM])?;
        let dir = self.dir.clone();
        let pid = self.pid;
        thread::Builder::new()
            .name("volseal-signals".into())
            .spawn(move || {
                if let Some(signo) = signals.forever().next() {
                    warn!("received signal {signo}; releasing {} and exiting", dir.display());
                    let _ = remove_if_owned(&dir, pid);
                    std::process::exit(EXIT_SIGNAL_BASE + signo);
                }
            })?;
        Ok(())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("failed to release lock {}: {err}", self.dir.display());
        }
    }
}

/// Exclusive `flock` on `<lock_dir>.guard`, held while an acquirer checks,
/// reclaims, and creates the lock directory. Closing the file unlocks it.
struct ReclaimGuard {
    _file: File,
}

impl ReclaimGuard {
    fn lock(dir: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(guard_path(dir))?;
        loop {
            if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } == 0 {
                return Ok(Self { _file: file });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

fn guard_path(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(".guard");
    PathBuf::from(name)
}

/// Inspect the lock directory without touching it.
pub fn inspect<P: AsRef<Path>>(lock_dir: P) -> LockStatus {
    let dir = lock_dir.as_ref();
    if !dir.exists() {
        return LockStatus::Free;
    }
    match read_pid(dir) {
        None => LockStatus::Ambiguous,
        Some(pid) if process_alive(pid) => LockStatus::Held(pid),
        Some(pid) => LockStatus::Stale(pid),
    }
}

fn lock_fail(dir: &Path, reason: impl Into<String>) -> VolsealError {
    VolsealError::LockFail {
        lock_dir: dir.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_pid(dir: &Path) -> Option<i32> {
    let raw = fs::read_to_string(dir.join(PID_FILE_NAME)).ok()?;
    raw.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Only the recorded owner may remove the directory.
fn remove_if_owned(dir: &Path, pid: i32) -> io::Result<()> {
    match read_pid(dir) {
        Some(holder) if holder == pid => match fs::remove_dir_all(dir) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

fn current_pid() -> i32 {
    std::process::id() as i32
}

/// `kill(pid, 0)`: `ESRCH` means dead; `EPERM` still means the pid exists.
fn process_alive(pid: i32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}
