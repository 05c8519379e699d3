//! Pid file for the running daemon.
//!
//! `stop`, `reload` and `status` find the daemon through this file and talk
//! to it with signals.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{DaemonError, DaemonResult};

/// Owns the pid file while the daemon runs; removes it on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current pid to `path`.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] if the file names a live
    /// process. A stale file is replaced.
    pub fn create(path: &Path) -> DaemonResult<Self> {
        if let Some(pid) = read_pid(path)? {
            if is_alive(pid) {
                return Err(DaemonError::AlreadyRunning(pid));
            }
            warn!(pid, path = %path.display(), "removing stale pid file");
        }
        std::fs::write(path, format!("{}\n", std::process::id()))?;
        debug!(path = %path.display(), "pid file written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Read a pid file. Missing or unparseable files read as `None`.
pub fn read_pid(path: &Path) -> DaemonResult<Option<i32>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse().ok().filter(|pid| *pid > 0)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether a process with `pid` exists. A process we may not signal still
/// counts as alive.
pub fn is_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send `signal` to `pid`.
pub fn send_signal(pid: i32, signal: libc::c_int) -> DaemonResult<()> {
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().into())
    }
}

/// Pid of the running daemon, or [`DaemonError::NotRunning`].
pub fn running_pid(path: &Path) -> DaemonResult<i32> {
    match read_pid(path)? {
        Some(pid) if is_alive(pid) => Ok(pid),
        Some(pid) => Err(DaemonError::NotRunning(format!(
            "stale pid file {} names {pid}",
            path.display()
        ))),
        None => Err(DaemonError::NotRunning(format!(
            "no pid file at {}",
            path.display()
        ))),
    }
}
