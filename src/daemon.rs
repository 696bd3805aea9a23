//! Detaching from the terminal and guarding against a second instance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Errors raised while turning the process into a daemon.
#[derive(Debug)]
pub enum DaemonError {
    /// Another live process owns the PID file
    AlreadyRunning { pid: i32, pid_file: PathBuf },

    /// The working directory could not be entered
    WorkDir { path: PathBuf, source: io::Error },

    /// The PID file could not be read or written
    PidFile { path: PathBuf, source: io::Error },

    /// `daemon(3)` failed
    Detach(Errno),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::AlreadyRunning { pid, pid_file } => write!(
                f,
                "Already running as pid {} (see {})",
                pid,
                pid_file.display()
            ),
            DaemonError::WorkDir { path, source } => {
                write!(f, "Cannot enter working directory {}: {}", path.display(), source)
            }
            DaemonError::PidFile { path, source } => {
                write!(f, "PID file {} failed: {}", path.display(), source)
            }
            DaemonError::Detach(errno) => write!(f, "Failed to detach from terminal: {}", errno),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::WorkDir { source, .. } | DaemonError::PidFile { source, .. } => Some(source),
            DaemonError::Detach(errno) => Some(errno),
            DaemonError::AlreadyRunning { .. } => None,
        }
    }
}

/// A PID file owned by this process. Removed again on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path` for the current process.
    ///
    /// Fails with `AlreadyRunning` when the file names a process that is still
    /// alive. A stale file (dead pid or unparsable contents) is replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let path = path.into();
        ensure_not_running(&path)?;
        Self::write(path)
    }

    /// Write the current pid to `path` without checking for an owner.
    fn write(path: PathBuf) -> Result<Self, DaemonError> {
        let pid = std::process::id();
        fs::write(&path, format!("{}\n", pid)).map_err(|source| DaemonError::PidFile {
            path: path.clone(),
            source,
        })?;
        debug!(pid = pid, pid_file = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(pid_file = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

/// Read the pid recorded in `path`, if the file exists and holds one.
pub fn read_pid(path: &Path) -> Result<Option<i32>, DaemonError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<i32>().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DaemonError::PidFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// `true` when a process with `pid` exists. `EPERM` still means it exists,
/// just under another user.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn ensure_not_running(pid_file: &Path) -> Result<(), DaemonError> {
    match read_pid(pid_file)? {
        Some(pid) if pid != std::process::id() as i32 && process_alive(pid) => {
            Err(DaemonError::AlreadyRunning {
                pid,
                pid_file: pid_file.to_path_buf(),
            })
        }
        Some(pid) => {
            debug!(pid = pid, pid_file = %pid_file.display(), "Replacing stale PID file");
            Ok(())
        }
        None => Ok(()),
    }
}

/// Detach from the controlling terminal and record the daemon's pid.
///
/// The instance check and the `chdir` happen before forking so their errors
/// still reach the terminal. Standard streams are redirected to `/dev/null`;
/// must be called before any threads (including a tokio runtime) exist.
pub fn detach(work_dir: &Path, pid_file: &Path) -> Result<PidFile, DaemonError> {
    let pid_file = anchor_to_current_dir(pid_file)?;
    ensure_not_running(&pid_file)?;

    std::env::set_current_dir(work_dir).map_err(|source| DaemonError::WorkDir {
        path: work_dir.to_path_buf(),
        source,
    })?;

    nix::unistd::daemon(true, false).map_err(DaemonError::Detach)?;

    PidFile::write(pid_file)
}

/// Absolute form of `path`, so it names the same file after a `chdir`.
pub fn anchor_to_current_dir(path: &Path) -> Result<PathBuf, DaemonError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .map_err(|source| DaemonError::PidFile {
            path: path.to_path_buf(),
            source,
        })
}
