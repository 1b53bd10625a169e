//! Marker file that keeps two processes from backing up into the same
//! target root at once.
//!
//! The in-process guard lives in the scheduler; this lock covers a CLI `run`
//! racing a daemon, or two daemons sharing a target.

use crate::error::{BackupError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const LOCK_FILE_NAME: &str = ".dailymirror.lock";

/// A lock left behind by a process that died is taken over after this long.
pub const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Held for the lifetime of one session. Dropping it removes the marker.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Create `<target_root>/.dailymirror.lock`, creating the root if needed.
    ///
    /// Fails with [`BackupError::AlreadyRunning`] while another live lock exists.
    pub fn acquire(target_root: &Path) -> Result<Self> {
        fs::create_dir_all(target_root).map_err(|source| BackupError::CreateDir {
            path: target_root.to_path_buf(),
            source,
        })?;

        let path = target_root.join(LOCK_FILE_NAME);
        let mut took_over = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if took_over || !is_stale(&path) {
                        return Err(BackupError::AlreadyRunning);
                    }
                    warn!(path = %path.display(), "removing stale session lock");
                    let _ = fs::remove_file(&path);
                    took_over = true;
                }
                Err(e) => return Err(BackupError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove session lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("usb");

        let lock = SessionLock::acquire(&target).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(SessionLock::acquire(&target), Err(BackupError::AlreadyRunning)));

        drop(lock);
        assert!(!target.join(LOCK_FILE_NAME).exists());
        assert!(SessionLock::acquire(&target).is_ok());
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        fs::write(&path, "12345\n").unwrap();
        let old = SystemTime::now() - STALE_AFTER - Duration::from_secs(60);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();

        let lock = SessionLock::acquire(dir.path()).unwrap();
        let owner = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_unusable_target_root() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        assert!(matches!(
            SessionLock::acquire(&blocker.join("target")),
            Err(BackupError::CreateDir { .. })
        ));
    }
}
