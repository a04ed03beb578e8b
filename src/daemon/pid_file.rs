//! PID file handling
//!
//! The file holds the decimal PID of the running session manager. It is
//! created on start, removed on drop, and used by `--kill` to find the
//! process to signal.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// PID file owned by this process
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write our PID, refusing to start when another instance is alive.
    ///
    /// A file left behind by a dead process is replaced.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(pid) = read_pid(path) {
            if pid != std::process::id() as i32 && process_alive(pid) {
                anyhow::bail!(
                    "Session manager already running (pid {}, pid file {})",
                    pid,
                    path.display()
                );
            }
            info!("Removing stale pid file {} (pid {})", path.display(), pid);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create pid file directory {}", parent.display()))?;
        }

        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;
        debug!("Wrote pid file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove pid file {}: {}", self.path.display(), e);
        }
    }
}

/// PID recorded in a file; `None` when missing or unparsable
pub fn read_pid(path: &Path) -> Option<i32> {
    let raw = std::fs::read_to_string(path).ok()?;
    match raw.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => None,
    }
}

/// Whether a process exists (signal 0 probe)
pub fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        // exists, owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send SIGTERM to the instance recorded in `path`; returns its PID
pub fn kill_running(path: &Path) -> Result<i32> {
    let pid = read_pid(path)
        .with_context(|| format!("No running session manager found (pid file {})", path.display()))?;

    if !process_alive(pid) {
        anyhow::bail!(
            "Session manager (pid {}) is not running; stale pid file {}",
            pid,
            path.display()
        );
    }

    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to pid {}", pid))?;
    info!("Sent SIGTERM to session manager (pid {})", pid);
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/sm.pid");

        let pid_file = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(pid_file.path()), Some(std::process::id() as i32));

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sm.pid");
        // pid_max on Linux is far below this
        std::fs::write(&path, "999999999\n").unwrap();

        let _pid_file = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
    }

    #[test]
    fn test_live_owner_blocks_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sm.pid");
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, child.id().to_string()).unwrap();

        let err = PidFile::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("already running"));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_read_pid_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sm.pid");

        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "0").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn test_kill_without_pid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(kill_running(&dir.path().join("missing.pid")).is_err());
    }

    #[test]
    fn test_kill_terminates_recorded_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sm.pid");
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, child.id().to_string()).unwrap();

        assert_eq!(kill_running(&path).unwrap(), child.id() as i32);
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
