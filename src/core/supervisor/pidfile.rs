// src/core/supervisor/pidfile.rs

//! The process-wide PID lock. One keeper process tree owns one data
//! directory; a stale lock left by a crash is reclaimed.

use crate::core::errors::StewardError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Holds the PID file for the lifetime of the process; dropping the
/// guard removes the file.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquires the lock, rejecting the start when another live process
    /// holds it. A lock naming a dead PID is reclaimed.
    pub fn acquire(path: &Path) -> Result<Self, StewardError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let pid: i32 = contents.trim().parse().unwrap_or(0);
                if pid > 0 && process_is_alive(pid) {
                    return Err(StewardError::AlreadyRunning { pid });
                }
                warn!("reclaiming stale pid file {} (pid {pid})", path.display());
                std::fs::remove_file(path)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lost the race against another starting keeper.
                let pid = std::fs::read_to_string(path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0);
                return Err(StewardError::AlreadyRunning { pid });
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!("acquired pid lock at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn process_is_alive(pid: i32) -> bool {
    // Signal 0 probes for existence without touching the process. EPERM
    // still means the process exists, just under another user.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
