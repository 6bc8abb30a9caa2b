//! Single-instance update lock
//!
//! Ensures only one update runs per scope using:
//! - A non-blocking exclusive `flock` on the scope's lock file
//! - Lock info (PID, timestamp, scope) written into the file for operators
//! - Release on drop, so every exit path unlocks
//!
//! The kernel drops the flock when the process dies, so a crashed run never
//! leaves its scope locked.

use crate::error::{Result, UpdateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, warn};

/// Lock file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID holding the lock
    pub pid: u32,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
    /// "system" or "user"
    pub scope: String,
}

impl LockInfo {
    fn new(scope: &str) -> Self {
        Self {
            pid: process::id(),
            acquired_at: Utc::now(),
            scope: scope.to_string(),
        }
    }

    /// Read the info left by the current or last holder
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Held lock; released on [`LockHandle::release`] or drop
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlock now. Calling this more than once is harmless.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = unlock(&file) {
                warn!(path = %self.path.display(), "failed to release lock: {}", e);
            } else {
                debug!(path = %self.path.display(), "lock released");
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Try to take the lock at `path` without blocking.
///
/// Returns `Ok(None)` when another process holds it.
pub fn acquire(path: &Path, scope: &str) -> Result<Option<LockHandle>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), "failed to set lock file permissions: {}", e);
        }
    }

    if !try_lock_exclusive(&file)? {
        debug!(path = %path.display(), "lock already held");
        return Ok(None);
    }

    let info = LockInfo::new(scope);
    let content = serde_json::to_string_pretty(&info)?;
    file.set_len(0)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    debug!(path = %path.display(), pid = info.pid, "lock acquired");
    Ok(Some(LockHandle {
        path: path.to_path_buf(),
        file: Some(file),
    }))
}

/// Like [`acquire`], but contention is an [`UpdateError::AlreadyRunning`]
pub fn acquire_or_fail(path: &Path, scope: &str) -> Result<LockHandle> {
    acquire(path, scope)?.ok_or_else(|| UpdateError::AlreadyRunning {
        path: path.to_path_buf(),
    })
}

/// Release a handle; equivalent to dropping it
pub fn release(mut handle: LockHandle) {
    handle.release();
}

/// Non-blocking exclusive flock. `Ok(false)` means already locked.
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fd is a valid descriptor owned by `file` for this call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn unlock(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fd is a valid descriptor owned by `file` for this call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
    }
    Ok(())
}
